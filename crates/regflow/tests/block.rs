// SPDX-License-Identifier: AGPL-3.0-only

//! Block transaction engine against in-test responders

use parking_lot::Mutex;
use regflow::{
    Block, BlockConfig, MemEmulator, RegflowError, Transaction, TransactionError,
    TransactionResponder,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Completes synchronously, echoing writes into a mirror and serving reads from it
#[derive(Debug)]
struct Mirror {
    memory: Mutex<Vec<u8>>,
    base: u64,
    min_access: u32,
    calls: AtomicUsize,
    /// XOR applied to read-back data
    corrupt: Mutex<Vec<u8>>,
}

impl Mirror {
    fn new(base: u64, size: usize, min_access: u32) -> Arc<Self> {
        Arc::new(Self {
            memory: Mutex::new(vec![0; size]),
            base,
            min_access,
            calls: AtomicUsize::new(0),
            corrupt: Mutex::new(Vec::new()),
        })
    }
}

impl TransactionResponder for Mirror {
    fn min_access(&self) -> u32 {
        self.min_access
    }

    fn max_access(&self) -> u32 {
        4096
    }

    fn do_transaction(&self, mut transaction: Transaction) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let start = (transaction.address() - self.base) as usize;
        let end = start + transaction.size();
        {
            let mut memory = self.memory.lock();
            if transaction.kind().is_write() {
                memory[start..end].copy_from_slice(transaction.data());
            } else {
                transaction.data_mut().copy_from_slice(&memory[start..end]);
                for (b, x) in transaction.data_mut().iter_mut().zip(self.corrupt.lock().iter()) {
                    *b ^= x;
                }
            }
        }
        transaction.done(0);
    }
}

/// Drops every transaction without completing it
#[derive(Debug, Default)]
struct BlackHole {
    calls: AtomicUsize,
}

impl TransactionResponder for BlackHole {
    fn min_access(&self) -> u32 {
        1
    }

    fn max_access(&self) -> u32 {
        4096
    }

    fn do_transaction(&self, _transaction: Transaction) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands transactions to a worker thread that completes them later
#[derive(Debug)]
struct Deferred {
    queue: Mutex<mpsc::Sender<Transaction>>,
}

impl Deferred {
    fn spawn(delay: Duration, status: u32) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Transaction>();
        thread::spawn(move || {
            for mut transaction in rx {
                thread::sleep(delay);
                if !transaction.kind().is_write() {
                    transaction.data_mut().fill(0x5A);
                }
                transaction.done(status);
            }
        });
        Arc::new(Self {
            queue: Mutex::new(tx),
        })
    }
}

impl TransactionResponder for Deferred {
    fn min_access(&self) -> u32 {
        4
    }

    fn max_access(&self) -> u32 {
        4096
    }

    fn do_transaction(&self, transaction: Transaction) {
        let _ = self.queue.lock().send(transaction);
    }
}

#[test]
fn synchronous_echo_write() {
    let mirror = Mirror::new(0x1000, 4, 4);
    let block = Block::new(0x1000, 4).unwrap();
    block.set_slave(mirror.clone());

    block.set_uint(0, 8, 0xAB).unwrap();
    block.blocking_write().unwrap();

    assert!(!block.is_busy());
    assert_eq!(block.error_code(), 0);
    assert_eq!(mirror.memory.lock()[0], 0xAB);
}

#[test]
fn read_merges_and_sets_updated_once() {
    let mirror = Mirror::new(0x2000, 8, 4);
    mirror.memory.lock().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    let block = Block::new(0x2000, 8).unwrap();
    block.set_slave(mirror);

    assert!(!block.get_updated().unwrap());
    block.background_read().unwrap();
    assert!(block.get_updated().unwrap());
    assert!(!block.get_updated().unwrap());
    assert_eq!(block.get_uint(0, 64).unwrap(), 0x0807_0605_0403_0201);

    block.blocking_write().unwrap();
    assert!(!block.get_updated().unwrap());
}

#[test]
fn blocking_read_consumes_updated() {
    let mirror = Mirror::new(0x2000, 8, 4);
    mirror.memory.lock().copy_from_slice(&[8, 7, 6, 5, 4, 3, 2, 1]);
    let block = Block::new(0x2000, 8).unwrap();
    block.set_slave(mirror);

    block.blocking_read().unwrap();
    assert_eq!(block.get_uint(0, 64).unwrap(), 0x0102_0304_0506_0708);
    assert!(!block.get_updated().unwrap());

    // A pending flag from a background read is taken by the next blocking verify.
    block.background_read().unwrap();
    block.blocking_verify().unwrap();
    assert!(!block.get_updated().unwrap());
}

#[test]
fn disabled_block_never_submits() {
    let mirror = Mirror::new(0, 4, 4);
    let block = Block::with_config(
        0,
        4,
        BlockConfig {
            enable: false,
            ..BlockConfig::default()
        },
    )
    .unwrap();
    block.set_slave(mirror.clone());

    block.background_read().unwrap();
    block.background_write().unwrap();
    block.background_verify().unwrap();
    block.posted_write().unwrap();
    block.blocking_read().unwrap();
    block.blocking_write().unwrap();
    block.blocking_verify().unwrap();

    assert!(!block.is_busy());
    assert_eq!(mirror.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn silent_transport_times_out_and_recovers() {
    let hole = Arc::new(BlackHole::default());
    let block = Block::new(0x40, 4).unwrap();
    block.set_timeout(Duration::from_millis(50));
    block.set_slave(hole.clone());

    let start = Instant::now();
    let err = block.blocking_read().unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.transaction_error(), Some(TransactionError::Timeout));
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_secs(5));
    assert!(!block.is_busy());
    assert!(matches!(
        block.get_updated(),
        Err(RegflowError::Memory { error: TransactionError::Timeout, .. })
    ));

    // Next transaction starts clean.
    let mirror = Mirror::new(0x40, 4, 4);
    block.set_slave(mirror);
    block.blocking_write().unwrap();
    assert_eq!(block.error(), None);
    assert_eq!(hole.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn background_read_timeout_surfaces_on_next_access() {
    let block = Block::new(0, 4).unwrap();
    block.set_timeout(Duration::from_millis(20));
    block.set_slave(Arc::new(BlackHole::default()));

    block.background_read().unwrap();
    assert!(block.is_busy());
    assert!(matches!(
        block.get_uint(0, 8),
        Err(RegflowError::Memory { error: TransactionError::Timeout, .. })
    ));
    assert!(!block.is_busy());
    // Setters do not raise the stored error.
    block.set_uint(0, 8, 1).unwrap();
}

#[test]
fn verify_passes_on_matching_hardware() {
    let mirror = Mirror::new(0x100, 4, 4);
    let block = Block::new(0x100, 4).unwrap();
    block.set_slave(mirror);

    block.set_uint(4, 12, 0xABC).unwrap();
    block.add_verify(4, 12).unwrap();
    block.blocking_write().unwrap();
    block.blocking_verify().unwrap();
    assert_eq!(block.error(), None);
}

#[test]
fn verify_fails_on_one_masked_bit() {
    let mirror = Mirror::new(0x100, 4, 4);
    let block = Block::new(0x100, 4).unwrap();
    block.set_slave(mirror.clone());

    block.set_uint(0, 32, 0x1234_5678).unwrap();
    block.add_verify(0, 16).unwrap();
    block.blocking_write().unwrap();

    // Unmasked bit differs: still passes.
    *mirror.corrupt.lock() = vec![0, 0, 0x80, 0];
    block.blocking_verify().unwrap();

    // Masked bit differs: verify error.
    *mirror.corrupt.lock() = vec![0, 0x01, 0, 0];
    let err = block.blocking_verify().unwrap_err();
    assert_eq!(err.transaction_error(), Some(TransactionError::Verify));
    assert!(err.to_string().contains("verify"));
    assert_eq!(block.error_code(), TransactionError::Verify.code());

    // Shadow data is untouched by verification.
    assert!(matches!(block.get_uint(0, 32), Err(RegflowError::Memory { .. })));
    block.blocking_write().unwrap();
    assert_eq!(block.get_uint(0, 32).unwrap(), 0x1234_5678);
}

#[test]
fn transport_error_is_distinct_from_verify() {
    let block = Block::new(0, 4).unwrap();
    block.set_slave(Deferred::spawn(Duration::ZERO, 0x0000_0042));
    let err = block.blocking_write().unwrap_err();
    assert_eq!(err.transaction_error(), Some(TransactionError::Transport(0x42)));
    assert!(err.to_string().contains("transport"));
}

#[test]
fn completion_from_another_thread() {
    let block = Block::new(0x10, 8).unwrap();
    block.set_slave(Deferred::spawn(Duration::from_millis(10), 0));

    block.background_read().unwrap();
    assert!(block.is_busy());
    assert!(block.get_updated().unwrap());
    assert_eq!(block.get_uint(0, 64).unwrap(), 0x5A5A_5A5A_5A5A_5A5A);

    block.blocking_read().unwrap();
    assert!(!block.get_updated().unwrap());
}

#[test]
fn late_completion_after_timeout_is_ignored() {
    let block = Block::new(0, 4).unwrap();
    block.set_timeout(Duration::from_millis(10));
    block.set_slave(Deferred::spawn(Duration::from_millis(100), 0));

    assert!(block.blocking_read().is_err());
    thread::sleep(Duration::from_millis(150));
    assert!(!block.is_busy());
    assert_eq!(block.error(), Some(TransactionError::Timeout));
    assert_eq!(block.get_uint(0, 32).ok(), None);
}

#[test]
fn size_padded_to_min_access() {
    let mirror = Mirror::new(0, 8, 4);
    let block = Block::new(0, 5).unwrap();
    block.set_uint(32, 8, 0xEE).unwrap();
    block.set_slave(mirror.clone());

    block.blocking_write().unwrap();
    assert_eq!(block.size(), 8);
    assert_eq!(block.get_uint(32, 8).unwrap(), 0xEE);
    assert_eq!(block.get_uint(40, 24).unwrap(), 0);
    assert_eq!(mirror.memory.lock()[4], 0xEE);
}

#[test]
fn emulator_rejects_misaligned_address() {
    let emulator = Arc::new(MemEmulator::new());
    let block = Block::new(0x1002, 4).unwrap();
    block.set_slave(emulator);
    let err = block.blocking_read().unwrap_err();
    assert_eq!(err.transaction_error(), Some(TransactionError::Address));
}

#[test]
fn full_address_includes_responder_offset() {
    #[derive(Debug)]
    struct Offset;

    impl TransactionResponder for Offset {
        fn min_access(&self) -> u32 {
            1
        }
        fn max_access(&self) -> u32 {
            4
        }
        fn offset(&self) -> u64 {
            0x8000_0000
        }
        fn do_transaction(&self, transaction: Transaction) {
            transaction.done(0);
        }
    }

    let block = Block::new(0x20, 4).unwrap();
    assert_eq!(block.full_address(), 0x20);
    block.set_slave(Arc::new(Offset));
    assert_eq!(block.full_address(), 0x8000_0020);
}

#[test]
fn concurrent_writers_serialize() {
    let emulator = Arc::new(MemEmulator::new());
    let block = Block::new(0, 4).unwrap();
    block.set_slave(emulator.clone());

    let handles: Vec<_> = (0..4u64)
        .map(|i| {
            let block = Arc::clone(&block);
            thread::spawn(move || {
                for _ in 0..50 {
                    block.set_uint(i as usize * 8, 8, i + 1).unwrap();
                    block.blocking_write().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(emulator.peek(0, 4), vec![1, 2, 3, 4]);
    assert_eq!(emulator.transaction_count(), 200);
}

#[test]
fn bit_fields_reject_overflow_without_mutation() {
    let block = Block::new(0, 4).unwrap();
    block.set_uint(0, 32, 0xFFFF_FFFF).unwrap();
    assert!(matches!(
        block.set_uint(30, 3, 0),
        Err(RegflowError::Boundary { value: 33, limit: 32, .. })
    ));
    assert!(matches!(
        block.get_uint(0, 65),
        Err(RegflowError::Boundary { value: 65, limit: 64, .. })
    ));
    assert_eq!(block.get_uint(0, 32).unwrap(), 0xFFFF_FFFF);
}

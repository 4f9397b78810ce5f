// SPDX-License-Identifier: AGPL-3.0-only

//! In-process memory responder
//!
//! Sparse byte-addressed memory that completes every transaction
//! synchronously, inside `do_transaction`. Unwritten bytes read as zero.
//! Used for self-tests and for exercising blocks without hardware.

use super::interface::TransactionResponder;
use super::transaction::{Transaction, TransactionError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Emulator configuration
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Access granularity in bytes; addresses must be aligned to it
    pub min_width: u32,

    /// Largest single access in bytes
    pub max_size: u32,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            min_width: 4,
            max_size: u32::MAX,
        }
    }
}

/// Sparse memory emulator
#[derive(Debug, Default)]
pub struct MemEmulator {
    config: EmulatorConfig,
    memory: Mutex<HashMap<u64, u8>>,
    transactions: AtomicU64,
}

impl MemEmulator {
    /// Create an emulator with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an emulator with explicit configuration
    pub fn with_config(config: EmulatorConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Read `len` bytes starting at `address`
    ///
    /// The address space wraps past `u64::MAX` back to 0.
    pub fn peek(&self, address: u64, len: usize) -> Vec<u8> {
        let memory = self.memory.lock();
        (0u64..)
            .take(len)
            .map(|i| memory.get(&address.wrapping_add(i)).copied().unwrap_or(0))
            .collect()
    }

    /// Store bytes starting at `address`, wrapping like [`peek`](Self::peek)
    pub fn poke(&self, address: u64, bytes: &[u8]) {
        let mut memory = self.memory.lock();
        for (i, &b) in (0u64..).zip(bytes) {
            memory.insert(address.wrapping_add(i), b);
        }
    }

    /// Transactions serviced so far, failed ones included
    pub fn transaction_count(&self) -> u64 {
        self.transactions.load(Ordering::Relaxed)
    }

    fn check(&self, transaction: &Transaction) -> Result<(), TransactionError> {
        let width = u64::from(self.config.min_width.max(1));
        if transaction.address() % width != 0 {
            return Err(TransactionError::Address);
        }
        if transaction.size() > self.config.max_size as usize {
            return Err(TransactionError::Size);
        }
        Ok(())
    }
}

impl TransactionResponder for MemEmulator {
    fn min_access(&self) -> u32 {
        self.config.min_width
    }

    fn max_access(&self) -> u32 {
        self.config.max_size
    }

    fn do_transaction(&self, mut transaction: Transaction) {
        self.transactions.fetch_add(1, Ordering::Relaxed);

        if let Err(err) = self.check(&transaction) {
            tracing::debug!(
                "Emulator rejected {} at {:#x}, size {}: {err}",
                transaction.kind(),
                transaction.address(),
                transaction.size()
            );
            transaction.fail(err);
            return;
        }

        let address = transaction.address();
        if transaction.kind().is_write() {
            self.poke(address, transaction.data());
        } else {
            let len = transaction.size();
            let bytes = self.peek(address, len);
            transaction.data_mut().copy_from_slice(&bytes);
        }
        transaction.done(0);
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Register block: shadow memory for one device address range
//!
//! A [`Block`] keeps three equally sized byte buffers:
//!
//! ```text
//! data         value last read from / to be written to hardware
//! verify_data  value read back by a verify transaction
//! verify_mask  1 bits participate in verification
//! ```
//!
//! and arbitrates transactions on them with a busy flag and a condition
//! variable:
//!
//! ```text
//!          background_*()                 done_transaction(id) / timeout
//!   Idle ─────────────────▶ Pending ──────────────────────────────────▶ Idle
//!  busy=false               busy=true                                busy=false
//! ```
//!
//! At most one transaction is in flight. Every operation that touches the
//! buffers first waits for the block to go idle; a wait that outlasts the
//! block timeout resolves the stuck transaction to
//! [`TransactionError::Timeout`] so a silent transport can never wedge a
//! caller.
//!
//! Transaction outcomes are stored, not raised: they surface on the next
//! `blocking_*`, [`get_updated`](Block::get_updated) or value read. The
//! error is cleared when the next transaction starts.

use super::interface::{MemoryMaster, TransactionInitiator, TransactionResponder};
use super::transaction::{
    Transaction, TransactionError, TransactionId, TransactionKind,
};
use crate::error::{RegflowError, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use regflow_layout::field;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shortest timeout a block accepts
pub const MIN_TIMEOUT: Duration = Duration::from_micros(1);

/// Block configuration
#[derive(Debug, Clone)]
pub struct BlockConfig {
    /// How long a caller waits for an in-flight transaction
    pub timeout: Duration,

    /// Disabled blocks never submit transactions
    pub enable: bool,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            enable: true,
        }
    }
}

#[derive(Debug)]
struct BlockState {
    address: u64,
    data: Vec<u8>,
    verify_data: Vec<u8>,
    verify_mask: Vec<u8>,
    /// Bytes claimed through `reserve`; the block never shrinks below this
    reserved: usize,
    enable: bool,
    busy: bool,
    updated: bool,
    error: Option<TransactionError>,
    timeout: Duration,
    pending: Option<(TransactionId, TransactionKind)>,
}

impl BlockState {
    fn size(&self) -> usize {
        self.data.len()
    }

    /// Resize all three buffers, keeping the overlap and zero-filling growth.
    fn resize(&mut self, size: usize) -> Result<()> {
        if size > self.data.len() {
            let extra = size - self.data.len();
            for buf in [&mut self.data, &mut self.verify_data, &mut self.verify_mask] {
                buf.try_reserve_exact(extra)
                    .map_err(|_| RegflowError::Allocation { size })?;
            }
        }
        self.data.resize(size, 0);
        self.verify_data.resize(size, 0);
        self.verify_mask.resize(size, 0);
        Ok(())
    }

    fn end_transaction(&mut self, error: Option<TransactionError>) {
        self.busy = false;
        self.pending = None;
        self.error = error;
    }
}

fn zeroed(size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| RegflowError::Allocation { size })?;
    buf.resize(size, 0);
    Ok(buf)
}

/// Concurrency-safe shadow of a device register range
///
/// Always handled through an `Arc`: in-flight transactions keep a weak
/// reference back to the block for their completion.
#[derive(Debug)]
pub struct Block {
    master: MemoryMaster,
    state: Mutex<BlockState>,
    busy_cond: Condvar,
    this: Weak<Block>,
}

impl Block {
    /// Create a block at `address` spanning `size` bytes, default config
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Allocation`] if the buffers cannot be allocated.
    pub fn new(address: u64, size: usize) -> Result<Arc<Self>> {
        Self::with_config(address, size, BlockConfig::default())
    }

    /// Create a block with explicit configuration
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Allocation`] if the buffers cannot be allocated.
    pub fn with_config(address: u64, size: usize, config: BlockConfig) -> Result<Arc<Self>> {
        let state = BlockState {
            address,
            data: zeroed(size)?,
            verify_data: zeroed(size)?,
            verify_mask: zeroed(size)?,
            reserved: 0,
            enable: config.enable,
            busy: false,
            updated: false,
            error: None,
            timeout: config.timeout.max(MIN_TIMEOUT),
            pending: None,
        };

        Ok(Arc::new_cyclic(|this| Self {
            master: MemoryMaster::new(),
            state: Mutex::new(state),
            busy_cond: Condvar::new(),
            this: this.clone(),
        }))
    }

    /// Bind the responder that serves this block
    pub fn set_slave(&self, slave: Arc<dyn TransactionResponder>) {
        self.master.set_slave(slave);
    }

    /// Responder binding
    pub const fn master(&self) -> &MemoryMaster {
        &self.master
    }

    /// Block address
    pub fn address(&self) -> u64 {
        self.state.lock().address
    }

    /// Block address combined with the responder offset
    pub fn full_address(&self) -> u64 {
        self.address() | self.master.req_offset()
    }

    /// Move the block; waits for any in-flight transaction first
    pub fn set_address(&self, address: u64) {
        self.wait_and_lock().address = address;
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.state.lock().size()
    }

    /// Resize the shadow buffers, preserving existing bytes
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Boundary`] if `size` is below a reserved
    /// range and [`RegflowError::Allocation`] if growth fails.
    pub fn set_size(&self, size: usize) -> Result<()> {
        let mut state = self.wait_and_lock();
        if size < state.reserved {
            return Err(RegflowError::boundary("Block::set_size", state.reserved, size));
        }
        state.resize(size)
    }

    /// Claim a bit range, growing the block to cover it
    ///
    /// Claimed ranges pin the minimum size for later [`set_size`](Self::set_size) calls.
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Allocation`] if growth fails.
    pub fn reserve(&self, bit_offset: usize, bit_count: usize) -> Result<()> {
        let bytes = bit_offset.saturating_add(bit_count).div_ceil(8);
        let mut state = self.wait_and_lock();
        if bytes > state.size() {
            state.resize(bytes)?;
        }
        state.reserved = state.reserved.max(bytes);
        Ok(())
    }

    /// Transaction timeout
    pub fn timeout(&self) -> Duration {
        self.state.lock().timeout
    }

    /// Set the transaction timeout; zero is raised to [`MIN_TIMEOUT`]
    pub fn set_timeout(&self, timeout: Duration) {
        self.wait_and_lock().timeout = timeout.max(MIN_TIMEOUT);
    }

    /// Whether transactions are submitted
    pub fn enable(&self) -> bool {
        self.state.lock().enable
    }

    /// Enable or disable transaction submission
    pub fn set_enable(&self, enable: bool) {
        self.wait_and_lock().enable = enable;
    }

    /// Whether a transaction is in flight
    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }

    /// Outcome of the last transaction, after waiting for it to finish
    pub fn error(&self) -> Option<TransactionError> {
        self.wait_and_lock().error
    }

    /// Outcome of the last transaction as a status code (`0` = none)
    pub fn error_code(&self) -> u32 {
        self.error().map_or(0, TransactionError::code)
    }

    /// Read and clear the updated flag
    ///
    /// The flag is set when a read completes without error and is also
    /// cleared by [`blocking_read`](Self::blocking_read) and
    /// [`blocking_verify`](Self::blocking_verify).
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Memory`] instead of a flag while the block
    /// holds a transaction error.
    pub fn get_updated(&self) -> Result<bool> {
        self.take_updated("Block::get_updated")
    }

    /// Mark bits as participating in write verification (cumulative)
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Boundary`] if the range ends past the block.
    pub fn add_verify(&self, bit_offset: usize, bit_count: usize) -> Result<()> {
        let mut state = self.wait_and_lock();
        field::set_bits(&mut state.verify_mask, bit_offset, bit_count)
            .map_err(|e| RegflowError::field("Block::add_verify", e))
    }

    /// Start a read; returns once submitted
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] if no responder is bound.
    pub fn background_read(&self) -> Result<()> {
        self.req_transaction(TransactionKind::Read)
    }

    /// Start a write; returns once submitted
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] if no responder is bound.
    pub fn background_write(&self) -> Result<()> {
        self.req_transaction(TransactionKind::Write)
    }

    /// Start a verify read-back; returns once submitted
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] if no responder is bound.
    pub fn background_verify(&self) -> Result<()> {
        self.req_transaction(TransactionKind::Verify)
    }

    /// Fire-and-forget write
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] if no responder is bound.
    pub fn posted_write(&self) -> Result<()> {
        self.req_transaction(TransactionKind::Post)
    }

    /// Read and wait for completion
    ///
    /// Consumes the updated flag the read sets, so a following
    /// [`get_updated`](Self::get_updated) reports `false`.
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Memory`] if the read failed or timed out.
    pub fn blocking_read(&self) -> Result<()> {
        self.req_transaction(TransactionKind::Read)?;
        self.take_updated("Block::blocking_read").map(drop)
    }

    /// Write and wait for completion
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Memory`] if the write failed or timed out.
    pub fn blocking_write(&self) -> Result<()> {
        self.req_transaction(TransactionKind::Write)?;
        self.wait_complete("Block::blocking_write")
    }

    /// Read back, compare under the verify mask and wait for completion
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Memory`] carrying
    /// [`TransactionError::Verify`] on a masked mismatch, or the transport
    /// failure / timeout otherwise.
    pub fn blocking_verify(&self) -> Result<()> {
        self.req_transaction(TransactionKind::Verify)?;
        self.take_updated("Block::blocking_verify").map(drop)
    }

    /// Read an unsigned field of up to 64 bits
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Boundary`] for a field wider than 64 bits or
    /// ending past the block, and [`RegflowError::Memory`] if the block
    /// holds a transaction error (the shadow value is not trustworthy).
    pub fn get_uint(&self, bit_offset: usize, bit_count: usize) -> Result<u64> {
        let state = self.wait_and_lock();
        let value = field::get_uint(&state.data, bit_offset, bit_count)
            .map_err(|e| RegflowError::field("Block::get_uint", e))?;
        self.check_error("Block::get_uint", &state)?;
        Ok(value)
    }

    /// Write an unsigned field of up to 64 bits into the shadow buffer
    ///
    /// Only the targeted bits change.
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Boundary`] for a field wider than 64 bits or
    /// ending past the block; the buffer is left untouched.
    pub fn set_uint(&self, bit_offset: usize, bit_count: usize, value: u64) -> Result<()> {
        let mut state = self.wait_and_lock();
        field::set_uint(&mut state.data, bit_offset, bit_count, value)
            .map_err(|e| RegflowError::field("Block::set_uint", e))
    }

    /// Shadow buffer as a NUL-terminated string
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Memory`] if the block holds a transaction error.
    pub fn get_string(&self) -> Result<String> {
        let state = self.wait_and_lock();
        self.check_error("Block::get_string", &state)?;
        let end = state
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(state.data.len());
        Ok(String::from_utf8_lossy(&state.data[..end]).into_owned())
    }

    /// Store a string, zero-filling the rest of the block
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Boundary`] if the string is longer than the block.
    pub fn set_string(&self, value: &str) -> Result<()> {
        let mut state = self.wait_and_lock();
        let bytes = value.as_bytes();
        if bytes.len() > state.size() {
            return Err(RegflowError::boundary(
                "Block::set_string",
                bytes.len(),
                state.size(),
            ));
        }
        state.data[..bytes.len()].copy_from_slice(bytes);
        state.data[bytes.len()..].fill(0);
        Ok(())
    }

    /// Copy of the shadow buffer
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Memory`] if the block holds a transaction error.
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        let state = self.wait_and_lock();
        self.check_error("Block::snapshot", &state)?;
        Ok(state.data.clone())
    }

    /// Lock the state once no transaction is in flight
    ///
    /// A transaction still pending when the timeout expires is resolved
    /// here: busy is cleared, the error becomes `Timeout`, and waiters are
    /// woken exactly as a completion would.
    fn wait_and_lock(&self) -> MutexGuard<'_, BlockState> {
        let mut state = self.state.lock();
        if !state.busy {
            return state;
        }

        let deadline = Instant::now() + state.timeout;
        while state.busy {
            if self.busy_cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        if state.busy {
            if let Some((id, kind)) = state.pending {
                warn!(
                    "Block {:#x}: {kind} id={id} timed out after {:?}",
                    state.address, state.timeout
                );
            }
            state.end_transaction(Some(TransactionError::Timeout));
            self.busy_cond.notify_all();
        }
        state
    }

    fn check_error(&self, op: &'static str, state: &BlockState) -> Result<()> {
        match state.error {
            Some(error) => Err(RegflowError::Memory {
                op,
                error,
                address: state.address | self.master.req_offset(),
                size: state.size(),
            }),
            None => Ok(()),
        }
    }

    fn wait_complete(&self, op: &'static str) -> Result<()> {
        let state = self.wait_and_lock();
        self.check_error(op, &state)
    }

    fn req_transaction(&self, kind: TransactionKind) -> Result<()> {
        let min_access = self.master.req_min_access()? as usize;

        let (id, address, data) = {
            let mut state = self.wait_and_lock();

            let padded = field::pad_to(state.size(), min_access);
            if padded != state.size() {
                debug!(
                    "Block {:#x}: padding size {} to {padded} for {min_access}-byte access",
                    state.address,
                    state.size()
                );
                state.resize(padded)?;
            }

            if !state.enable {
                debug!("Block {:#x} disabled, skipping {kind}", state.address);
                return Ok(());
            }

            let mut data = zeroed(state.size())?;
            if kind.is_write() {
                data.copy_from_slice(&state.data);
            }

            let id = TransactionId::next();
            state.error = None;
            state.busy = true;
            state.pending = Some((id, kind));
            (id, state.address, data)
        };

        // The lock is released: the responder may complete synchronously.
        debug!(
            "Block {address:#x}: submitting {kind} id={id} size={}",
            data.len()
        );
        let initiator: Weak<dyn TransactionInitiator> = self.this.clone();
        self.master
            .req_transaction(Transaction::new(id, kind, address, data, initiator))
    }

    /// Read and clear the updated flag, raising a stored transaction error
    fn take_updated(&self, op: &'static str) -> Result<bool> {
        let mut state = self.wait_and_lock();
        self.check_error(op, &state)?;
        Ok(std::mem::take(&mut state.updated))
    }
}

impl TransactionInitiator for Block {
    fn done_transaction(&self, id: TransactionId, data: Vec<u8>, status: u32) {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            match state.pending {
                Some((pending, kind)) if pending == id && state.busy => {
                    let mut error = TransactionError::from_code(status);
                    if error.is_none() {
                        let n = data.len().min(state.size());
                        match kind {
                            TransactionKind::Read => {
                                state.data[..n].copy_from_slice(&data[..n]);
                                state.updated = true;
                            }
                            TransactionKind::Verify => {
                                state.verify_data[..n].copy_from_slice(&data[..n]);
                                if let Some(byte) = field::masked_mismatch(
                                    &state.verify_data,
                                    &state.data,
                                    &state.verify_mask,
                                ) {
                                    warn!(
                                        "Block {:#x}: verify mismatch at byte {byte}",
                                        state.address
                                    );
                                    error = Some(TransactionError::Verify);
                                }
                            }
                            TransactionKind::Write | TransactionKind::Post => {}
                        }
                    }
                    debug!(
                        "Block {:#x}: {kind} id={id} done, status={status:#x}",
                        state.address
                    );
                    state.end_transaction(error);
                }
                _ => warn!("Ignoring completion for transaction {id}, not in flight"),
            }
        }
        self.busy_cond.notify_all();
    }
}

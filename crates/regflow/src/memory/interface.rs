// SPDX-License-Identifier: AGPL-3.0-only

//! Memory transaction contract
//!
//! Two sides meet here:
//! - a [`TransactionInitiator`] (e.g. a [`Block`](super::Block)) submits
//!   [`Transaction`]s and receives completions,
//! - a [`TransactionResponder`] (emulator, mmap window, network bridge)
//!   performs the access and calls [`Transaction::done`].
//!
//! A responder may complete synchronously, inside `do_transaction`, or
//! later from any thread. Initiators therefore never hold their own locks
//! across a call into the responder.

use super::transaction::{Transaction, TransactionId};
use crate::error::{RegflowError, Result};
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;

/// Completion side of the memory contract
pub trait TransactionInitiator: Send + Sync {
    /// Transaction `id` finished with `status` (`0` = success).
    ///
    /// `data` is the transaction's byte buffer as the responder left it.
    fn done_transaction(&self, id: TransactionId, data: Vec<u8>, status: u32);
}

/// Memory slave: performs accesses on behalf of initiators
pub trait TransactionResponder: Debug + Send + Sync {
    /// Minimum access granularity in bytes; initiators pad sizes up to a multiple
    fn min_access(&self) -> u32;

    /// Largest single access in bytes
    fn max_access(&self) -> u32;

    /// Base address OR'd into addresses for reporting
    fn offset(&self) -> u64 {
        0
    }

    /// Perform the access and eventually call [`Transaction::done`]
    fn do_transaction(&self, transaction: Transaction);
}

/// Initiator-side binding to one responder
#[derive(Debug, Default)]
pub struct MemoryMaster {
    slave: Mutex<Option<Arc<dyn TransactionResponder>>>,
}

impl MemoryMaster {
    /// Create an unbound master
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the responder that serves this master's transactions
    pub fn set_slave(&self, slave: Arc<dyn TransactionResponder>) {
        tracing::debug!("Memory master bound to {slave:?}");
        *self.slave.lock() = Some(slave);
    }

    /// Currently bound responder
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] if nothing is bound.
    pub fn slave(&self, op: &'static str) -> Result<Arc<dyn TransactionResponder>> {
        self.slave
            .lock()
            .clone()
            .ok_or(RegflowError::NoSlave { op })
    }

    /// Minimum access size of the bound responder
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] if nothing is bound.
    pub fn req_min_access(&self) -> Result<u32> {
        Ok(self.slave("MemoryMaster::req_min_access")?.min_access())
    }

    /// Maximum access size of the bound responder
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] if nothing is bound.
    pub fn req_max_access(&self) -> Result<u32> {
        Ok(self.slave("MemoryMaster::req_max_access")?.max_access())
    }

    /// Address offset of the bound responder, 0 when unbound
    pub fn req_offset(&self) -> u64 {
        self.slave.lock().as_ref().map_or(0, |s| s.offset())
    }

    /// Hand a transaction to the bound responder
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] if nothing is bound; the
    /// transaction is dropped uncompleted.
    pub fn req_transaction(&self, transaction: Transaction) -> Result<()> {
        let slave = self.slave("MemoryMaster::req_transaction")?;
        slave.do_transaction(transaction);
        Ok(())
    }
}

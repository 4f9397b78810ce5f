// SPDX-License-Identifier: AGPL-3.0-only

//! In-flight memory transaction
//!
//! A [`Transaction`] exists between the initiator's submission and the
//! responder's call to [`Transaction::done`]. It owns the bytes being moved:
//! write payload on the way out, read-back space on the way in. Completion
//! hands those bytes back to the initiator, which merges or compares them.

use super::interface::TransactionInitiator;
use regflow_layout::txn;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Weak;
use thiserror::Error;

/// Direction and purpose of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    /// Hardware to shadow buffer
    Read,
    /// Shadow buffer to hardware
    Write,
    /// Write with no completion wait on the caller side
    Post,
    /// Hardware to verify shadow, compared under the verify mask
    Verify,
}

impl TransactionKind {
    /// Numeric type code
    pub const fn code(self) -> u32 {
        match self {
            Self::Read => txn::READ,
            Self::Write => txn::WRITE,
            Self::Post => txn::POST,
            Self::Verify => txn::VERIFY,
        }
    }

    /// Whether data moves towards the hardware
    pub const fn is_write(self) -> bool {
        txn::is_write(self.code())
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Post => write!(f, "posted write"),
            Self::Verify => write!(f, "verify"),
        }
    }
}

/// Failed transaction outcome
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    /// No completion within the block timeout
    #[error("transaction timeout")]
    Timeout,

    /// Read-back differed from written data under the verify mask
    #[error("verify mismatch")]
    Verify,

    /// Responder rejected the address
    #[error("address error")]
    Address,

    /// Responder rejected the size
    #[error("size error")]
    Size,

    /// Transport-specific failure code
    #[error("transport error {0:#010x}")]
    Transport(u32),
}

impl TransactionError {
    /// Decode a completion status; `None` for success
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            txn::status::OK => None,
            txn::status::TIMEOUT => Some(Self::Timeout),
            txn::status::VERIFY => Some(Self::Verify),
            txn::status::ADDRESS => Some(Self::Address),
            txn::status::SIZE => Some(Self::Size),
            other => Some(Self::Transport(other)),
        }
    }

    /// Completion status code
    pub const fn code(self) -> u32 {
        match self {
            Self::Timeout => txn::status::TIMEOUT,
            Self::Verify => txn::status::VERIFY,
            Self::Address => txn::status::ADDRESS,
            Self::Size => txn::status::SIZE,
            Self::Transport(code) => code,
        }
    }
}

/// Process-unique transaction identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(u32);

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

impl TransactionId {
    /// Allocate a fresh identifier
    pub fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identifier value
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// One outstanding memory access
///
/// Dropping a transaction without calling [`done`](Self::done) is how a
/// lossy transport looks to the initiator: nothing completes and the
/// initiator's timeout resolves it.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    kind: TransactionKind,
    address: u64,
    data: Vec<u8>,
    initiator: Weak<dyn TransactionInitiator>,
}

impl Transaction {
    /// Create a transaction that reports back to `initiator`
    pub fn new(
        id: TransactionId,
        kind: TransactionKind,
        address: u64,
        data: Vec<u8>,
        initiator: Weak<dyn TransactionInitiator>,
    ) -> Self {
        Self {
            id,
            kind,
            address,
            data,
            initiator,
        }
    }

    /// Transaction identifier
    pub const fn id(&self) -> TransactionId {
        self.id
    }

    /// Transaction direction
    pub const fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Target address
    pub const fn address(&self) -> u64 {
        self.address
    }

    /// Bytes to transfer
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Write payload (or the zeroed read-back space)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Read-back space for the responder to fill
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Complete with a raw status code (`0` = success)
    ///
    /// Safe to call from any thread, including synchronously from inside
    /// the responder's `do_transaction`.
    pub fn done(self, status: u32) {
        let Self {
            id,
            data,
            initiator,
            ..
        } = self;
        match initiator.upgrade() {
            Some(initiator) => initiator.done_transaction(id, data, status),
            None => tracing::debug!("Transaction {id} completed after its initiator was dropped"),
        }
    }

    /// Complete with a failure
    pub fn fail(self, error: TransactionError) {
        self.done(error.code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_round_trip() {
        assert_eq!(TransactionError::from_code(0), None);
        for err in [
            TransactionError::Timeout,
            TransactionError::Verify,
            TransactionError::Address,
            TransactionError::Size,
            TransactionError::Transport(0x42),
        ] {
            assert_eq!(TransactionError::from_code(err.code()), Some(err));
        }
    }

    #[test]
    fn verify_and_transport_messages_differ() {
        let verify = TransactionError::Verify.to_string();
        let transport = TransactionError::Transport(1).to_string();
        assert!(verify.contains("verify"));
        assert!(transport.contains("transport"));
    }

    #[test]
    fn ids_are_unique() {
        let a = TransactionId::next();
        let b = TransactionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn done_without_initiator_is_harmless() {
        let orphan: Weak<dyn TransactionInitiator> = Weak::<NullInitiator>::new();
        let t = Transaction::new(TransactionId::next(), TransactionKind::Read, 0, vec![0; 4], orphan);
        assert_eq!(t.size(), 4);
        t.done(0);
    }

    struct NullInitiator;

    impl TransactionInitiator for NullInitiator {
        fn done_transaction(&self, _id: TransactionId, _data: Vec<u8>, _status: u32) {}
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for regflow operations

use crate::memory::TransactionError;
use regflow_layout::FieldError;
use thiserror::Error;

/// Result type alias for regflow operations
pub type Result<T> = std::result::Result<T, RegflowError>;

/// Errors that can occur during register and stream operations
#[derive(Debug, Error)]
pub enum RegflowError {
    /// Buffer memory could not be obtained
    #[error("Allocation of {size} bytes failed")]
    Allocation {
        /// Requested size in bytes
        size: usize,
    },

    /// Access outside a buffer, or an invalid size/width argument
    #[error("{op}: boundary violation, {value} exceeds limit {limit}")]
    Boundary {
        /// Operation that rejected the request
        op: &'static str,
        /// Offending value
        value: usize,
        /// Limit the value broke
        limit: usize,
    },

    /// A memory transaction finished in error
    #[error("{op}: {error} at address {address:#010x}, size {size}")]
    Memory {
        /// Operation that surfaced the error
        op: &'static str,
        /// Transaction outcome
        error: TransactionError,
        /// Full bus address of the block
        address: u64,
        /// Block size in bytes
        size: usize,
    },

    /// Frame or transaction requested with nothing attached to serve it
    #[error("{op}: no slave attached")]
    NoSlave {
        /// Operation that needed a slave
        op: &'static str,
    },

    /// Object is in a state that does not allow the operation
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Malformed stream data file
    #[error("Data format error: {reason}")]
    Format {
        /// Reason for failure
        reason: String,
    },

    /// I/O error during device or file access
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },
}

impl RegflowError {
    /// Create a boundary error
    pub const fn boundary(op: &'static str, value: usize, limit: usize) -> Self {
        Self::Boundary { op, value, limit }
    }

    /// Create a boundary error from a rejected bit-field request
    pub const fn field(op: &'static str, err: FieldError) -> Self {
        let (value, limit) = err.value_and_limit();
        Self::Boundary { op, value, limit }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create a data format error
    pub fn format(reason: impl Into<String>) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    /// Transaction outcome carried by a [`RegflowError::Memory`], if any
    pub const fn transaction_error(&self) -> Option<TransactionError> {
        match self {
            Self::Memory { error, .. } => Some(*error),
            _ => None,
        }
    }
}

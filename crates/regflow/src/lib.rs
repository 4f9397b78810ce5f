// SPDX-License-Identifier: AGPL-3.0-only

//! Register transactions and stream frames for instrument control.
//!
//! Two engines live here:
//!
//! - [`memory`]: [`Block`], a shadow of a device register range with
//!   bit-field access, one-at-a-time transactions, timeout recovery and
//!   post-write verification, plus the responders that serve it.
//! - [`stream`]: frames, the [`Master`] that provisions and fans them out,
//!   and file writer/reader sinks and sources.
//!
//! # Responders
//!
//! ```text
//! MemEmulator     sparse in-process memory (tests, self-test)
//! MmapResponder   mmap'd register window (UIO node, PCI resourceN)
//! ```
//!
//! # Quick start
//!
//! ```
//! use regflow::{Block, MemEmulator};
//! use std::sync::Arc;
//!
//! # fn main() -> regflow::Result<()> {
//! let emulator = Arc::new(MemEmulator::new());
//! let block = Block::new(0x1000, 4)?;
//! block.set_slave(emulator.clone());
//!
//! block.set_uint(0, 8, 0xAB)?;
//! block.blocking_write()?;
//! assert_eq!(emulator.peek(0x1000, 1), vec![0xAB]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod error;
pub mod memory;
pub mod stream;

/// Layout primitives (re-exported from regflow-layout).
pub mod layout {
    pub use regflow_layout::field::{get_uint, masked_mismatch, pad_to, set_uint, MAX_FIELD_BITS};
    pub use regflow_layout::record::{RecordMeta, HEADER_LEN};
    pub use regflow_layout::FieldError;
}

pub use error::{RegflowError, Result};
pub use memory::{
    Block, BlockConfig, EmulatorConfig, MemEmulator, MemoryMaster, MmapResponder, Transaction,
    TransactionError, TransactionId, TransactionInitiator, TransactionKind, TransactionResponder,
};
pub use stream::{
    connect, connect_bidir, copy_frame, Buffer, Frame, FramePtr, Master, Pool, PoolConfig,
    StreamReader, StreamSink, StreamSource, StreamWriter, WriterConfig,
};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        connect, Block, BlockConfig, Frame, FramePtr, Master, MemEmulator, RegflowError, Result,
        StreamSink, StreamSource, TransactionError, TransactionResponder,
    };
}

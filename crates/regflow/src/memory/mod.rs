// SPDX-License-Identifier: AGPL-3.0-only

//! Memory transaction engine
//!
//! [`Block`] shadows a device register range and turns bit-field
//! reads/writes into transactions against a [`TransactionResponder`].
//!
//! Responders shipped here:
//! - [`MemEmulator`]: sparse in-process memory, completes synchronously
//! - [`MmapResponder`]: a memory-mapped register window from a device file

mod block;
mod emulate;
mod interface;
mod mmap;
mod transaction;

pub use block::{Block, BlockConfig, MIN_TIMEOUT};
pub use emulate::{EmulatorConfig, MemEmulator};
pub use interface::{MemoryMaster, TransactionInitiator, TransactionResponder};
pub use mmap::MmapResponder;
pub use transaction::{Transaction, TransactionError, TransactionId, TransactionKind};

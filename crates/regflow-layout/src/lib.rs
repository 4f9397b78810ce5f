// SPDX-License-Identifier: AGPL-3.0-only

//! Data layouts shared by the regflow runtime.
//!
//! This crate has **no dependencies** and **no I/O**. It is a pure model of
//! the bytes regflow moves around: how a bit field sits inside a register
//! block, which numeric codes a memory transaction carries, and how a stream
//! frame is framed when it lands in a data file.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`field`] | Arbitrary-width (≤ 64 bit) unsigned field packing over byte slices, verify-mask helpers |
//! | [`txn`] | Transaction type codes and completion status codes |
//! | [`record`] | Stream data file record header (length word + metadata word) |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod field;
pub mod record;
pub mod txn;

pub use field::FieldError;

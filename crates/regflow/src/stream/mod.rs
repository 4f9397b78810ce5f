// SPDX-License-Identifier: AGPL-3.0-only

//! Stream fabric
//!
//! Producers own a [`Master`]; consumers implement [`StreamSink`]. A master
//! requests frames from its primary (first) sink and sends finished frames
//! to every sink, last registered first.
//!
//! ```text
//! StreamReader ──▶ Master ──┬──▶ StreamWriter (primary, provides frames)
//!                           └──▶ decoder / tap / bridge
//! ```

mod buffer;
mod frame;
mod master;
mod pool;
mod reader;
mod slave;
mod writer;

pub use buffer::Buffer;
pub use frame::{copy_frame, Frame, FramePtr, FrameReader, FrameWriter};
pub use master::Master;
pub use pool::{Pool, PoolConfig};
pub use reader::StreamReader;
pub use slave::{connect, connect_bidir, StreamSink, StreamSource};
pub use writer::{chain_path, StreamWriter, WriterConfig};

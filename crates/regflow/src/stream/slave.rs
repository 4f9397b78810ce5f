// SPDX-License-Identifier: AGPL-3.0-only

//! Stream consumer contract and wiring helpers

use super::frame::{Frame, FramePtr};
use super::master::Master;
use crate::error::Result;
use std::sync::Arc;

/// Frame consumer (stream slave)
///
/// A sink receives finished frames and, when it is a master's primary
/// slave, provisions the frames that master fills.
pub trait StreamSink: Send + Sync {
    /// Deliver a finished frame
    fn accept_frame(&self, frame: FramePtr);

    /// Allocate a frame with at least `size` bytes of capacity
    ///
    /// `zero_copy` says the caller can work with buffers backed by special
    /// memory; the default heap allocation ignores it.
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Allocation`](crate::RegflowError::Allocation)
    /// if the memory cannot be obtained.
    fn accept_req(&self, size: usize, zero_copy: bool) -> Result<Frame> {
        let _ = zero_copy;
        Frame::with_capacity(size)
    }
}

/// Frame producer (stream master side)
pub trait StreamSource: Send + Sync {
    /// Master that requests and distributes this source's frames
    fn master(&self) -> &Master;
}

/// Register `sink` as a consumer of `source`
///
/// The first sink connected to a source is its primary buffer provider.
pub fn connect(source: &dyn StreamSource, sink: Arc<dyn StreamSink>) {
    source.master().add_slave(sink);
}

/// Wire two relays to each other in both directions
pub fn connect_bidir<A, B>(a: &Arc<A>, b: &Arc<B>)
where
    A: StreamSource + StreamSink + 'static,
    B: StreamSource + StreamSink + 'static,
{
    a.master().add_slave(b.clone());
    b.master().add_slave(a.clone());
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Stream master: frame acquisition and fan-out
//!
//! ```text
//!            req_frame                       send_frame
//!  producer ──────────▶ slave[0] (primary)   producer ──▶ slave[n-1] ──▶ ... ──▶ slave[0]
//! ```
//!
//! Frames are always provisioned by the primary (first registered) slave,
//! which may hand out memory only it knows how to manage. Delivery runs over
//! every registered slave, last registered first.

use super::frame::{copy_frame, Frame, FramePtr};
use super::slave::StreamSink;
use crate::error::{RegflowError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Frame producer core
#[derive(Default)]
pub struct Master {
    slaves: Mutex<Vec<Arc<dyn StreamSink>>>,
}

impl fmt::Debug for Master {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Master")
            .field("slaves", &self.slave_count())
            .finish()
    }
}

impl Master {
    /// Master with no slaves
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer; the first one is also the primary buffer source
    pub fn add_slave(&self, slave: Arc<dyn StreamSink>) {
        let mut slaves = self.slaves.lock();
        slaves.push(slave);
        debug!("Stream master now has {} slave(s)", slaves.len());
    }

    /// Number of registered slaves
    pub fn slave_count(&self) -> usize {
        self.slaves.lock().len()
    }

    fn primary(&self, op: &'static str) -> Result<Arc<dyn StreamSink>> {
        self.slaves
            .lock()
            .first()
            .cloned()
            .ok_or(RegflowError::NoSlave { op })
    }

    /// Request a frame of at least `size` bytes from the primary slave
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] when nothing is registered, or the
    /// primary slave's allocation error.
    pub fn req_frame(&self, size: usize, zero_copy: bool) -> Result<Frame> {
        // Lock released before the call: allocation may block.
        let primary = self.primary("Master::req_frame")?;
        let frame = primary.accept_req(size, zero_copy)?;
        debug!(
            "Requested {size} bytes, got {} in {} buffer(s)",
            frame.capacity(),
            frame.buffer_count()
        );
        Ok(frame)
    }

    /// Deliver a frame to every slave, last registered first
    ///
    /// Iterates over a snapshot, so slaves may register further slaves
    /// while handling the frame.
    pub fn send_frame(&self, frame: FramePtr) {
        let slaves = self.slaves.lock().clone();
        for slave in slaves.iter().rev() {
            slave.accept_frame(Arc::clone(&frame));
        }
    }

    /// Make `frame` a single contiguous buffer
    ///
    /// Returns `Ok(true)` if the frame already is, or was replaced with a
    /// single-buffer copy. Returns `Ok(false)`, leaving the frame untouched,
    /// if it is segmented and either `allow_reallocate` is false or the
    /// primary slave cannot supply a single buffer of the payload size.
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::NoSlave`] when a copy is needed but nothing is
    /// registered.
    pub fn ensure_single_buffer(&self, frame: &mut FramePtr, allow_reallocate: bool) -> Result<bool> {
        if frame.is_single_buffer() {
            return Ok(true);
        }
        if !allow_reallocate {
            return Ok(false);
        }

        let size = frame.payload();
        let mut flat = self.req_frame(size, true)?;
        if !flat.is_single_buffer() {
            debug!(
                "Primary slave returned {} buffers for {size} bytes, frame left segmented",
                flat.buffer_count()
            );
            return Ok(false);
        }

        copy_frame(&mut frame.reader(), size, &mut flat.writer())?;
        flat.set_meta(frame.meta());
        debug!("Coalesced {size} byte frame into one buffer");
        *frame = Arc::new(flat);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Null;

    impl StreamSink for Null {
        fn accept_frame(&self, _frame: FramePtr) {}
    }

    #[test]
    fn req_frame_without_slave() {
        let master = Master::new();
        assert!(matches!(
            master.req_frame(16, false),
            Err(RegflowError::NoSlave { .. })
        ));
    }

    #[test]
    fn default_sink_allocates_heap_frame() {
        let master = Master::new();
        master.add_slave(Arc::new(Null));
        let frame = master.req_frame(100, true).unwrap();
        assert!(frame.is_single_buffer());
        assert_eq!(frame.capacity(), 100);
        assert_eq!(frame.payload(), 0);
    }

    #[test]
    fn debug_shows_slave_count() {
        let master = Master::new();
        master.add_slave(Arc::new(Null));
        assert_eq!(format!("{master:?}"), "Master { slaves: 1 }");
    }
}

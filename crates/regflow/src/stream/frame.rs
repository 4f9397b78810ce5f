// SPDX-License-Identifier: AGPL-3.0-only

//! Frames and frame cursors
//!
//! A [`Frame`] is an ordered list of [`Buffer`]s. Its payload always fills
//! buffers front to back:
//!
//! ```text
//! buffer 0         buffer 1         buffer 2
//! [##########]     [####......]     [..........]
//!  full              partial          empty
//! ```
//!
//! [`FrameReader`] and [`FrameWriter`] walk that layout without flattening
//! it, and [`copy_frame`] moves bytes between two frames chunk by chunk.

use super::buffer::Buffer;
use crate::error::{RegflowError, Result};
use regflow_layout::record::RecordMeta;
use std::io;
use std::sync::Arc;

/// Shared, read-only handle to a frame in flight
pub type FramePtr = Arc<Frame>;

/// One unit of streamed data
#[derive(Debug, Default)]
pub struct Frame {
    buffers: Vec<Buffer>,
    flags: u16,
    error: u8,
    channel: u8,
}

impl Frame {
    /// Frame with no buffers
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame backed by one heap buffer of `capacity` bytes
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Allocation`] if the memory cannot be obtained.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self::from_buffers(vec![Buffer::new(capacity)?]))
    }

    /// Frame over existing buffers, payload cleared
    pub fn from_buffers(mut buffers: Vec<Buffer>) -> Self {
        for buf in &mut buffers {
            buf.set_payload(0);
        }
        Self {
            buffers,
            ..Self::default()
        }
    }

    /// Append a buffer, which must not break the payload prefix layout
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::InvalidState`] when appending a buffer with
    /// payload behind one that is not full.
    pub fn push_buffer(&mut self, buffer: Buffer) -> Result<()> {
        let tail_full = self.buffers.last().map_or(true, |b| b.available() == 0);
        if buffer.payload() > 0 && !tail_full {
            return Err(RegflowError::invalid_state(
                "appending payload after a partially filled buffer",
            ));
        }
        self.buffers.push(buffer);
        Ok(())
    }

    /// Number of buffers
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Whether the frame is one contiguous region
    pub fn is_single_buffer(&self) -> bool {
        self.buffers.len() == 1
    }

    /// Buffers in payload order
    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    /// Total capacity across buffers
    pub fn capacity(&self) -> usize {
        self.buffers.iter().map(Buffer::capacity).sum()
    }

    /// Total payload across buffers
    pub fn payload(&self) -> usize {
        self.buffers.iter().map(Buffer::payload).sum()
    }

    /// Whether there is no payload
    pub fn is_empty(&self) -> bool {
        self.payload() == 0
    }

    /// Set the payload length, filling buffers front to back
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Boundary`] if `len` exceeds the capacity.
    pub fn set_payload(&mut self, len: usize) -> Result<()> {
        let capacity = self.capacity();
        if len > capacity {
            return Err(RegflowError::boundary("Frame::set_payload", len, capacity));
        }
        let mut left = len;
        for buf in &mut self.buffers {
            let n = left.min(buf.capacity());
            buf.set_payload(n);
            left -= n;
        }
        Ok(())
    }

    /// Payload slices, one per non-empty buffer
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.buffers
            .iter()
            .map(Buffer::data)
            .filter(|chunk| !chunk.is_empty())
    }

    /// Payload copied into one vector
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload());
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Cursor over the payload
    pub fn reader(&self) -> FrameReader<'_> {
        FrameReader {
            buffers: &self.buffers,
            index: 0,
            offset: 0,
        }
    }

    /// Cursor writing from the start of the frame
    ///
    /// The payload grows to cover every byte written; bytes past the write
    /// position keep their payload status.
    pub fn writer(&mut self) -> FrameWriter<'_> {
        FrameWriter {
            frame: self,
            index: 0,
            offset: 0,
        }
    }

    /// Producer flags
    pub const fn flags(&self) -> u16 {
        self.flags
    }

    /// Set producer flags
    pub fn set_flags(&mut self, flags: u16) {
        self.flags = flags;
    }

    /// Producer error bits
    pub const fn error(&self) -> u8 {
        self.error
    }

    /// Set producer error bits
    pub fn set_error(&mut self, error: u8) {
        self.error = error;
    }

    /// Logical channel
    pub const fn channel(&self) -> u8 {
        self.channel
    }

    /// Set logical channel
    pub fn set_channel(&mut self, channel: u8) {
        self.channel = channel;
    }

    /// Flags, error and channel together
    pub const fn meta(&self) -> RecordMeta {
        RecordMeta {
            flags: self.flags,
            error: self.error,
            channel: self.channel,
        }
    }

    /// Replace flags, error and channel
    pub fn set_meta(&mut self, meta: RecordMeta) {
        self.flags = meta.flags;
        self.error = meta.error;
        self.channel = meta.channel;
    }
}

/// Read cursor over a frame's payload
#[derive(Debug, Clone)]
pub struct FrameReader<'a> {
    buffers: &'a [Buffer],
    index: usize,
    offset: usize,
}

impl<'a> FrameReader<'a> {
    /// Payload bytes left to read
    pub fn remaining(&self) -> usize {
        self.buffers
            .iter()
            .skip(self.index)
            .map(Buffer::payload)
            .sum::<usize>()
            - self.offset
    }

    /// Contiguous payload at the cursor, empty at the end
    pub fn chunk(&mut self) -> &'a [u8] {
        let buffers = self.buffers;
        while let Some(buf) = buffers.get(self.index) {
            let data = buf.data();
            if self.offset < data.len() {
                return &data[self.offset..];
            }
            self.index += 1;
            self.offset = 0;
        }
        &[]
    }

    /// Move the cursor forward within the current chunk
    pub fn advance(&mut self, n: usize) {
        self.offset += n;
    }
}

impl io::Read for FrameReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let chunk = self.chunk();
        let n = chunk.len().min(out.len());
        out[..n].copy_from_slice(&chunk[..n]);
        self.advance(n);
        Ok(n)
    }
}

/// Write cursor over a frame's capacity
#[derive(Debug)]
pub struct FrameWriter<'a> {
    frame: &'a mut Frame,
    index: usize,
    offset: usize,
}

impl FrameWriter<'_> {
    /// Capacity left past the cursor
    pub fn remaining(&self) -> usize {
        self.frame
            .buffers
            .iter()
            .skip(self.index)
            .map(Buffer::capacity)
            .sum::<usize>()
            - self.offset
    }

    /// Contiguous writable space at the cursor, empty when the frame is full
    pub fn chunk_mut(&mut self) -> &mut [u8] {
        while self.index < self.frame.buffers.len() {
            if self.offset < self.frame.buffers[self.index].capacity() {
                return &mut self.frame.buffers[self.index].raw_mut()[self.offset..];
            }
            self.index += 1;
            self.offset = 0;
        }
        &mut []
    }

    /// Mark `n` bytes at the cursor as written
    pub fn advance(&mut self, n: usize) {
        self.offset += n;
        if let Some(buf) = self.frame.buffers.get_mut(self.index) {
            if buf.payload() < self.offset {
                buf.set_payload(self.offset);
            }
        }
    }
}

impl io::Write for FrameWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let chunk = self.chunk_mut();
        let n = chunk.len().min(data.len());
        chunk[..n].copy_from_slice(&data[..n]);
        self.advance(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Copy `size` bytes from a reader cursor to a writer cursor
///
/// Bytes move directly between buffer regions, one contiguous span at a
/// time. Both cursors advance by `size`.
///
/// # Errors
///
/// Returns [`RegflowError::Boundary`] if the source holds fewer than
/// `size` bytes or the destination has less space; neither cursor moves.
pub fn copy_frame(src: &mut FrameReader<'_>, size: usize, dst: &mut FrameWriter<'_>) -> Result<()> {
    let available = src.remaining();
    if size > available {
        return Err(RegflowError::boundary("copy_frame", size, available));
    }
    let space = dst.remaining();
    if size > space {
        return Err(RegflowError::boundary("copy_frame", size, space));
    }

    let mut left = size;
    while left > 0 {
        let from = src.chunk();
        let to = dst.chunk_mut();
        let n = from.len().min(to.len()).min(left);
        to[..n].copy_from_slice(&from[..n]);
        src.advance(n);
        dst.advance(n);
        left -= n;
    }
    Ok(())
}

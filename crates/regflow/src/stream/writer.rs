// SPDX-License-Identifier: AGPL-3.0-only

//! Stream data file writer
//!
//! A [`StreamWriter`] is a sink that appends every frame it receives to a
//! data file as one record (layout in [`regflow_layout::record`]). With a
//! maximum file size set, a record that would overflow the current file
//! starts the next one: `run.dat`, `run.dat.1`, `run.dat.2`, ...

use super::frame::{Frame, FramePtr};
use super::pool::{Pool, PoolConfig};
use super::slave::StreamSink;
use crate::error::{RegflowError, Result};
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use regflow_layout::record;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writer configuration
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Write buffer capacity in bytes
    pub buffer_size: usize,

    /// Roll over to a new file past this many bytes; 0 disables
    pub max_size: u64,

    /// Allocator for frames requested through this sink
    pub pool: PoolConfig,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            max_size: 0,
            pool: PoolConfig::default(),
        }
    }
}

/// Path of file `index` in a roll-over chain starting at `base`
pub fn chain_path(base: &Path, index: u32) -> PathBuf {
    if index == 0 {
        return base.to_path_buf();
    }
    let mut name = OsString::from(base.as_os_str());
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

#[derive(Debug, Default)]
struct WriterState {
    base: Option<PathBuf>,
    file: Option<BufWriter<File>>,
    index: u32,
    current: u64,
    total: u64,
    frames: u64,
}

impl WriterState {
    fn create(&mut self, buffer_size: usize) -> Result<()> {
        let base = self
            .base
            .as_deref()
            .ok_or_else(|| RegflowError::invalid_state("stream writer is closed"))?;
        let path = chain_path(base, self.index);
        let file = File::create(&path)?;
        tracing::info!("Writing stream data to {}", path.display());
        self.file = Some(BufWriter::with_capacity(buffer_size, file));
        self.current = 0;
        Ok(())
    }

    fn flush_close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// File-writing stream sink
#[derive(Debug)]
pub struct StreamWriter {
    config: WriterConfig,
    pool: Pool,
    state: Mutex<WriterState>,
}

impl Default for StreamWriter {
    fn default() -> Self {
        Self::new(WriterConfig::default())
    }
}

impl StreamWriter {
    /// Closed writer
    pub fn new(config: WriterConfig) -> Self {
        Self {
            pool: Pool::new(config.pool.clone()),
            config,
            state: Mutex::new(WriterState::default()),
        }
    }

    /// Start a new chain at `path`, closing any open file first
    ///
    /// Existing files are truncated. Counters restart at zero.
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Io`] if the file cannot be created.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut state = self.state.lock();
        state.flush_close()?;
        *state = WriterState {
            base: Some(path.as_ref().to_path_buf()),
            ..WriterState::default()
        };
        state.create(self.config.buffer_size)
    }

    /// Flush and close the current file
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Io`] if buffered data cannot be flushed.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let result = state.flush_close();
        if let Some(base) = state.base.take() {
            tracing::info!(
                "Closed {} after {} frame(s), {} bytes",
                base.display(),
                state.frames,
                state.total
            );
        }
        result
    }

    /// Whether frames are being written
    pub fn is_open(&self) -> bool {
        self.state.lock().file.is_some()
    }

    /// Bytes written since `open`, across all files of the chain
    pub fn size(&self) -> u64 {
        self.state.lock().total
    }

    /// Frames written since `open`
    pub fn frame_count(&self) -> u64 {
        self.state.lock().frames
    }

    /// Flush buffered records to disk
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Io`] on write failure.
    pub fn flush(&self) -> Result<()> {
        if let Some(file) = self.state.lock().file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    /// Append one frame as a record
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::InvalidState`] if no file is open,
    /// [`RegflowError::Boundary`] for a payload too large for the length
    /// word, and [`RegflowError::Io`] on write failure.
    pub fn write_frame(&self, frame: &Frame) -> Result<()> {
        let payload = frame.payload();
        let length = record::length_word(payload).ok_or_else(|| {
            RegflowError::boundary("StreamWriter::write_frame", payload, u32::MAX as usize)
        })?;
        let record_len = (record::HEADER_LEN + payload) as u64;

        let mut state = self.state.lock();
        if state.file.is_none() {
            return Err(RegflowError::invalid_state("stream writer is closed"));
        }

        let max = self.config.max_size;
        if max > 0 && state.current > 0 && state.current + record_len > max {
            state.flush_close()?;
            state.index += 1;
            state.create(self.config.buffer_size)?;
        }

        let mut header = BytesMut::with_capacity(record::HEADER_LEN);
        header.put_u32_le(length);
        header.put_u32_le(frame.meta().to_word());

        let file = state
            .file
            .as_mut()
            .ok_or_else(|| RegflowError::invalid_state("stream writer is closed"))?;
        file.write_all(&header)?;
        for chunk in frame.chunks() {
            file.write_all(chunk)?;
        }

        state.current += record_len;
        state.total += record_len;
        state.frames += 1;
        Ok(())
    }
}

impl StreamSink for StreamWriter {
    fn accept_frame(&self, frame: FramePtr) {
        if !self.is_open() {
            tracing::warn!("Stream writer closed, dropping {} byte frame", frame.payload());
            return;
        }
        if let Err(e) = self.write_frame(&frame) {
            tracing::error!("Stream writer failed to write frame: {e}");
        }
    }

    fn accept_req(&self, size: usize, zero_copy: bool) -> Result<Frame> {
        self.pool.accept_req(size, zero_copy)
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if let Err(e) = self.state.get_mut().flush_close() {
            tracing::error!("Stream writer flush failed during drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_paths() {
        let base = Path::new("/tmp/run.dat");
        assert_eq!(chain_path(base, 0), PathBuf::from("/tmp/run.dat"));
        assert_eq!(chain_path(base, 2), PathBuf::from("/tmp/run.dat.2"));
    }

    #[test]
    fn closed_writer_rejects_frames() {
        let writer = StreamWriter::default();
        assert!(!writer.is_open());
        let frame = Frame::with_capacity(4).unwrap();
        assert!(matches!(
            writer.write_frame(&frame),
            Err(RegflowError::InvalidState { .. })
        ));
        writer.accept_frame(std::sync::Arc::new(frame));
        assert_eq!(writer.frame_count(), 0);
    }

    #[test]
    fn record_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one.dat");
        let writer = StreamWriter::default();
        writer.open(&path).unwrap();

        let mut frame = Frame::with_capacity(3).unwrap();
        frame.writer().write_all(b"xyz").unwrap();
        frame.set_channel(1);
        frame.set_flags(0x0203);
        writer.write_frame(&frame).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(
            bytes,
            [7, 0, 0, 0, 0x03, 0x02, 0x00, 0x01, b'x', b'y', b'z']
        );
        assert_eq!(writer.size(), 11);
        assert_eq!(writer.frame_count(), 1);
    }
}

// SPDX-License-Identifier: AGPL-3.0-only

//! Stream data file reader
//!
//! Replays files produced by [`StreamWriter`](super::StreamWriter): each
//! record becomes a frame requested from the reader's primary slave and
//! sent to all of its slaves. Roll-over chains (`run.dat`, `run.dat.1`,
//! ...) are followed until the next file is missing.

use super::frame::FramePtr;
use super::master::Master;
use super::slave::StreamSource;
use super::writer::chain_path;
use crate::error::{RegflowError, Result};
use bytes::Buf;
use parking_lot::Mutex;
use regflow_layout::record::{self, RecordMeta};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// File-replaying stream source
#[derive(Debug, Default)]
pub struct StreamReader {
    master: Master,
    active: AtomicBool,
    stop: AtomicBool,
    worker: Mutex<Option<JoinHandle<Result<u64>>>>,
}

impl StreamReader {
    /// Idle reader with no slaves
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay the chain starting at `path` on the calling thread
    ///
    /// Returns the number of frames sent.
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Io`] if `path` cannot be opened,
    /// [`RegflowError::Format`] for a truncated or malformed record, and
    /// [`RegflowError::NoSlave`] if nothing is connected.
    pub fn read_file(&self, path: impl AsRef<Path>) -> Result<u64> {
        let base = path.as_ref();
        let mut frames = 0;
        let mut index = 0;
        loop {
            let path = chain_path(base, index);
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) if index > 0 && e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            };
            tracing::info!("Reading stream data from {}", path.display());
            frames += self.read_records(BufReader::new(file), &path)?;
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            index += 1;
        }
        Ok(frames)
    }

    fn read_records(&self, mut input: impl Read, path: &Path) -> Result<u64> {
        let mut frames = 0;
        let mut header = [0u8; record::HEADER_LEN];

        while !self.stop.load(Ordering::Acquire) {
            let got = read_full(&mut input, &mut header)?;
            if got == 0 {
                break;
            }
            if got < header.len() {
                return Err(RegflowError::format(format!(
                    "{}: truncated record header after {frames} record(s)",
                    path.display()
                )));
            }

            let mut cursor = &header[..];
            let length = cursor.get_u32_le();
            let meta = RecordMeta::from_word(cursor.get_u32_le());
            let size = record::payload_len(length).ok_or_else(|| {
                RegflowError::format(format!(
                    "{}: record length {length} shorter than its header",
                    path.display()
                ))
            })? as usize;

            let mut frame = self.master.req_frame(size, false)?;
            let copied = io::copy(&mut (&mut input).take(size as u64), &mut frame.writer())?;
            if copied != size as u64 {
                return Err(RegflowError::format(format!(
                    "{}: record {frames} truncated, {copied} of {size} payload bytes",
                    path.display()
                )));
            }
            frame.set_meta(meta);
            self.master.send_frame(FramePtr::new(frame));
            frames += 1;
        }
        tracing::debug!("{}: {frames} record(s)", path.display());
        Ok(frames)
    }

    /// Replay the chain at `path` on a background thread
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::InvalidState`] while a previous replay is
    /// still running, and [`RegflowError::Io`] if the thread cannot start.
    pub fn open(self: &Arc<Self>, path: impl AsRef<Path>) -> Result<()> {
        let mut worker = self.worker.lock();
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(RegflowError::invalid_state("stream reader already active"));
        }
        // A finished replay left behind by a caller that never waited.
        if let Some(done) = worker.take() {
            match done.join() {
                Ok(Ok(frames)) => tracing::debug!("Previous replay sent {frames} frame(s)"),
                Ok(Err(e)) => tracing::warn!("Previous replay ended with error: {e}"),
                Err(_) => tracing::warn!("Previous replay thread panicked"),
            }
        }

        self.stop.store(false, Ordering::Release);
        let path: PathBuf = path.as_ref().to_path_buf();
        let this = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("regflow-reader".into())
            .spawn(move || {
                let result = this.read_file(&path);
                if let Err(e) = &result {
                    tracing::error!("Stream reader stopped on {}: {e}", path.display());
                }
                this.active.store(false, Ordering::Release);
                result
            });

        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.active.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Whether a background replay is running
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Wait for the background replay to finish; returns frames sent
    ///
    /// Returns `Ok(0)` when no replay was started.
    ///
    /// # Errors
    ///
    /// Returns the replay's own error, or [`RegflowError::InvalidState`] if
    /// the replay thread panicked.
    pub fn close_wait(&self) -> Result<u64> {
        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| RegflowError::invalid_state("stream reader thread panicked"))?,
            None => Ok(0),
        }
    }

    /// Stop the background replay after the current record and wait for it
    ///
    /// # Errors
    ///
    /// Same as [`close_wait`](Self::close_wait).
    pub fn close(&self) -> Result<u64> {
        self.stop.store(true, Ordering::Release);
        self.close_wait()
    }
}

impl StreamSource for StreamReader {
    fn master(&self) -> &Master {
        &self.master
    }
}

/// Fill `buf` as far as the input allows; returns bytes read
fn read_full(input: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

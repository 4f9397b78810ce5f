// SPDX-License-Identifier: AGPL-3.0-only

//! Memory-mapped register window responder
//!
//! Maps a device file (a UIO node, or a PCI `resourceN` file) and services
//! transactions against the mapping with 32-bit volatile accesses, one word
//! at a time. Word accesses are serialized so two blocks never interleave
//! a multi-word transfer.
//!
//! Unsafe code is confined to mapping, unmapping and the two word
//! accessors; everything else is bounds-checked before it gets there.

use super::interface::TransactionResponder;
use super::transaction::{Transaction, TransactionError};
use crate::error::{RegflowError, Result};
use parking_lot::Mutex;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;

/// Register width in bytes
pub const WORD: usize = 4;

/// Register window mapped from a device file
#[derive(Debug)]
pub struct MmapResponder {
    ptr: NonNull<u8>,
    size: usize,
    base: u64,
    path: PathBuf,
    access: Mutex<()>,
    _file: File,
}

impl MmapResponder {
    /// Map the first `size` bytes of `path`, or the whole file when `None`
    ///
    /// `base` is the bus address of the window; it is reported through
    /// [`TransactionResponder::offset`] and transaction addresses are
    /// relative to the window start.
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Io`] if the file cannot be opened or mapped,
    /// and [`RegflowError::InvalidState`] for an empty window.
    pub fn open(path: impl AsRef<Path>, size: Option<usize>, base: u64) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!("Mapping register window: {}", path.display());

        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let size = match size {
            Some(size) => size,
            None => usize::try_from(file.metadata()?.len())
                .map_err(|_| RegflowError::invalid_state("window larger than address space"))?,
        };
        if size == 0 {
            return Err(RegflowError::invalid_state(format!(
                "{} has an empty register window",
                path.display()
            )));
        }

        // SAFETY: mmap preconditions:
        // - fd is valid, just opened read/write above
        // - size is non-zero (checked above)
        // - READ|WRITE with SHARED so stores reach the device
        // - offset 0 is page aligned
        // The file is kept in the struct so the mapping outlives no fd, and
        // Drop unmaps exactly this pointer and size.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(std::io::Error::from)?;

        let ptr = NonNull::new(addr.cast::<u8>())
            .ok_or_else(|| RegflowError::invalid_state("mmap returned a null mapping"))?;

        tracing::info!(
            "Mapped {} ({size} bytes at {ptr:p}, bus base {base:#x})",
            path.display()
        );

        Ok(Self {
            ptr,
            size,
            base,
            path: path.to_path_buf(),
            access: Mutex::new(()),
            _file: file,
        })
    }

    /// Window size in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Mapped device file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, address: u64, len: usize) -> std::result::Result<usize, TransactionError> {
        let offset = usize::try_from(address).map_err(|_| TransactionError::Address)?;
        if offset % WORD != 0 {
            return Err(TransactionError::Address);
        }
        if len % WORD != 0 {
            return Err(TransactionError::Size);
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(offset),
            _ => Err(TransactionError::Address),
        }
    }

    fn read_word(&self, offset: usize) -> u32 {
        // SAFETY: callers pass an offset checked by `check`: word aligned and
        // offset + 4 <= size, so the pointer is inside the live mapping.
        // Volatile because device registers have read side effects.
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        tracing::trace!("Read u32 @ {offset:#x} = {value:#x}");
        value
    }

    fn write_word(&self, offset: usize, value: u32) {
        tracing::trace!("Write u32 @ {offset:#x} = {value:#x}");
        // SAFETY: same bounds and alignment as `read_word`. Volatile so the
        // store is emitted exactly once and in program order.
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
    }
}

impl TransactionResponder for MmapResponder {
    fn min_access(&self) -> u32 {
        WORD as u32
    }

    fn max_access(&self) -> u32 {
        u32::try_from(self.size).unwrap_or(u32::MAX)
    }

    fn offset(&self) -> u64 {
        self.base
    }

    fn do_transaction(&self, mut transaction: Transaction) {
        let offset = match self.check(transaction.address(), transaction.size()) {
            Ok(offset) => offset,
            Err(err) => {
                tracing::warn!(
                    "{}: rejected {} at {:#x}, size {}: {err}",
                    self.path.display(),
                    transaction.kind(),
                    transaction.address(),
                    transaction.size()
                );
                transaction.fail(err);
                return;
            }
        };

        {
            let _guard = self.access.lock();
            if transaction.kind().is_write() {
                for (i, word) in transaction.data().chunks_exact(WORD).enumerate() {
                    let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                    self.write_word(offset + i * WORD, value);
                }
            } else {
                for (i, word) in transaction.data_mut().chunks_exact_mut(WORD).enumerate() {
                    word.copy_from_slice(&self.read_word(offset + i * WORD).to_le_bytes());
                }
            }
        }
        transaction.done(0);
    }
}

impl Drop for MmapResponder {
    fn drop(&mut self) {
        tracing::debug!("Unmapping {} ({} bytes)", self.path.display(), self.size);

        // SAFETY: ptr and size are exactly what mmap returned and was given
        // in `open`; nothing else holds the pointer once we are dropping.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: the mapping belongs to this value alone and stays valid until
// Drop; moving it to another thread does not affect the mapping.
unsafe impl Send for MmapResponder {}

// SAFETY: all word accesses from `&self` go through the `access` mutex, and
// the pointer and size are never mutated after `open`.
unsafe impl Sync for MmapResponder {}

// SPDX-License-Identifier: AGPL-3.0-only

//! Frame buffer pool
//!
//! Sinks embed a [`Pool`] to answer `accept_req`. With a fixed buffer size
//! the pool splits large requests into several buffers and keeps a bounded
//! free list of returned buffers for reuse.

use super::buffer::{alloc_storage, Buffer};
use super::frame::Frame;
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Pool configuration
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Size of every buffer; `None` sizes each frame's single buffer to the request
    pub fixed_size: Option<u32>,

    /// Returned buffers kept for reuse; only fixed-size buffers are kept
    pub pool_size: usize,
}

/// State shared between a pool and the buffers it handed out
#[derive(Debug)]
pub struct PoolShared {
    fixed_size: Option<usize>,
    pool_size: usize,
    free: Mutex<Vec<Vec<u8>>>,
    alloc_bytes: AtomicU64,
    alloc_count: AtomicU64,
}

impl PoolShared {
    fn take(&self, size: usize) -> Result<Vec<u8>> {
        let reused = if self.fixed_size == Some(size) {
            self.free.lock().pop()
        } else {
            None
        };
        let storage = match reused {
            Some(storage) => storage,
            None => alloc_storage(size)?,
        };
        self.alloc_bytes.fetch_add(size as u64, Ordering::Relaxed);
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
        Ok(storage)
    }

    /// Take back the storage of a dropped buffer
    pub(crate) fn recycle(&self, storage: Vec<u8>) {
        self.alloc_bytes
            .fetch_sub(storage.len() as u64, Ordering::Relaxed);
        self.alloc_count.fetch_sub(1, Ordering::Relaxed);

        if self.fixed_size == Some(storage.len()) {
            let mut free = self.free.lock();
            if free.len() < self.pool_size {
                free.push(storage);
            }
        }
    }
}

/// Buffer allocator for sinks
#[derive(Debug, Clone)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl Pool {
    /// Create a pool; a fixed size of zero means no fixed size
    pub fn new(config: PoolConfig) -> Self {
        let fixed_size = config
            .fixed_size
            .filter(|&size| size > 0)
            .map(|size| size as usize);
        Self {
            shared: Arc::new(PoolShared {
                fixed_size,
                pool_size: config.pool_size,
                free: Mutex::new(Vec::new()),
                alloc_bytes: AtomicU64::new(0),
                alloc_count: AtomicU64::new(0),
            }),
        }
    }

    /// Allocate a frame with at least `size` bytes of capacity
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Allocation`](crate::RegflowError::Allocation)
    /// if buffer memory cannot be obtained.
    pub fn accept_req(&self, size: usize, _zero_copy: bool) -> Result<Frame> {
        let (count, each) = match self.shared.fixed_size {
            Some(fixed) => (size.div_ceil(fixed).max(1), fixed),
            None => (1, size),
        };

        let mut buffers = Vec::with_capacity(count);
        for _ in 0..count {
            let storage = self.shared.take(each)?;
            buffers.push(Buffer::from_storage(storage, Some(Arc::downgrade(&self.shared))));
        }
        tracing::trace!("Pool allocated {count} x {each} bytes for a {size} byte request");
        Ok(Frame::from_buffers(buffers))
    }

    /// Bytes held by outstanding buffers
    pub fn alloc_bytes(&self) -> u64 {
        self.shared.alloc_bytes.load(Ordering::Relaxed)
    }

    /// Number of outstanding buffers
    pub fn alloc_count(&self) -> u64 {
        self.shared.alloc_count.load(Ordering::Relaxed)
    }

    /// Buffers waiting on the free list
    pub fn free_count(&self) -> usize {
        self.shared.free.lock().len()
    }
}

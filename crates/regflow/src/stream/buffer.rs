// SPDX-License-Identifier: AGPL-3.0-only

//! Fixed-capacity payload buffer

use super::pool::PoolShared;
use crate::error::{RegflowError, Result};
use std::sync::Weak;

/// One contiguous region of a frame
///
/// Capacity is fixed at creation. The payload is a prefix of the region.
/// A buffer allocated from a [`Pool`](super::Pool) hands its storage back
/// to the pool when dropped.
#[derive(Debug)]
pub struct Buffer {
    storage: Vec<u8>,
    payload: usize,
    home: Option<Weak<PoolShared>>,
}

/// Zeroed storage, failing instead of aborting when memory is short
pub(crate) fn alloc_storage(capacity: usize) -> Result<Vec<u8>> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(capacity)
        .map_err(|_| RegflowError::Allocation { size: capacity })?;
    storage.resize(capacity, 0);
    Ok(storage)
}

impl Buffer {
    /// Heap buffer with `capacity` zeroed bytes
    ///
    /// # Errors
    ///
    /// Returns [`RegflowError::Allocation`] if the memory cannot be obtained.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self::from_storage(alloc_storage(capacity)?, None))
    }

    /// Wrap existing storage; its full length becomes the capacity
    pub(crate) const fn from_storage(storage: Vec<u8>, home: Option<Weak<PoolShared>>) -> Self {
        Self {
            storage,
            payload: 0,
            home,
        }
    }

    /// Capacity in bytes
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Bytes of payload
    pub const fn payload(&self) -> usize {
        self.payload
    }

    /// Unused capacity past the payload
    pub fn available(&self) -> usize {
        self.capacity() - self.payload
    }

    /// Set the payload length, clamped to capacity
    pub fn set_payload(&mut self, len: usize) {
        self.payload = len.min(self.capacity());
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8] {
        &self.storage[..self.payload]
    }

    /// Whole region, payload and spare capacity
    pub fn raw(&self) -> &[u8] {
        &self.storage
    }

    /// Whole region, mutable
    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.storage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(pool) = self.home.take().and_then(|home| home.upgrade()) {
            pool.recycle(std::mem::take(&mut self.storage));
        }
    }
}

// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Receive-buffer pooling for session handlers.
//!
//! The pool is intentionally simple:
//! - uniform buffer size, fixed retention capacity
//! - `acquire` falls back to a fresh allocation when the pool runs dry
//! - `release` drops wrong-sized and overflow buffers instead of retaining them
//!
//! This amortizes per-frame allocations on the upload hot path.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Snapshot of pool occupancy and hit/miss counters.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub available: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

struct PoolInner {
    available: Vec<Vec<u8>>,
    hits: u64,
    misses: u64,
}

/// Thread-safe pool of uniform, cleared byte buffers.
pub struct BufferPool {
    buffer_size: usize,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    /// Create a pool of `capacity` preallocated buffers of `buffer_size` bytes.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        let available = (0..capacity).map(|_| vec![0u8; buffer_size]).collect();
        Self {
            buffer_size,
            capacity,
            inner: Mutex::new(PoolInner { available, hits: 0, misses: 0 }),
        }
    }

    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a cleared buffer of exactly [`buffer_size`](Self::buffer_size) bytes.
    ///
    /// When the pool is empty a fresh buffer is allocated; it will be
    /// discarded on release if the pool is already full again.
    pub fn acquire(&self) -> Vec<u8> {
        let mut guard = self.lock();
        if let Some(buf) = guard.available.pop() {
            guard.hits += 1;
            return buf;
        }
        guard.misses += 1;
        drop(guard);
        vec![0u8; self.buffer_size]
    }

    /// Return a buffer to the pool.
    ///
    /// Only buffers of the pool's exact size are retained, and only while
    /// the pool is below capacity; everything else is dropped. Retained
    /// buffers are cleared first.
    pub fn release(&self, mut buf: Vec<u8>) {
        if buf.len() != self.buffer_size {
            return;
        }
        let mut guard = self.lock();
        if guard.available.len() >= self.capacity {
            return;
        }
        buf.fill(0);
        guard.available.push(buf);
    }

    pub fn stats(&self) -> PoolStats {
        let guard = self.lock();
        PoolStats {
            available: guard.available.len(),
            capacity: self.capacity,
            hits: guard.hits,
            misses: guard.misses,
        }
    }
}

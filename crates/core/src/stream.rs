// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-stream metadata and state machine.
//!
//! A stream moves `UPLOADING → READY` on finalize or `UPLOADING → ERROR` on a
//! failed write; both end states are terminal. The context mutex serializes
//! every mutation, which is what makes one `append` happen-before the next
//! `read` on the same stream. Reads only snapshot the written prefix under
//! the lock and drop it before touching the file.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use tracing::{debug, error};

use crate::constants::SEGMENT_SIZE;
use crate::error::{CacheError, Result};
use crate::mmap_file::SegmentedMmapFile;

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Created and accepting appends from its single writer connection.
    Uploading,
    /// Finalized: exact size on disk, immutable, readable at any offset.
    Ready,
    /// A write failed; the stream is frozen until the GC reclaims it.
    Error,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uploading => "UPLOADING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        })
    }
}

struct StreamState {
    append_offset: u64,
    total_size: u64,
    status: StreamStatus,
    last_accessed_at: Instant,
}

/// Metadata and backing file for one cached stream.
pub struct StreamContext {
    stream_id: String,
    cache_path: PathBuf,
    created_at: SystemTime,
    file: SegmentedMmapFile,
    state: Mutex<StreamState>,
}

impl std::fmt::Debug for StreamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamContext")
            .field("stream_id", &self.stream_id)
            .field("cache_path", &self.cache_path)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl StreamContext {
    /// Create the context with an empty backing file, status `UPLOADING`.
    pub(crate) fn create(stream_id: String, cache_path: PathBuf) -> Result<Self> {
        Self::create_with_segment_size(stream_id, cache_path, SEGMENT_SIZE)
    }

    /// Like [`create`](Self::create), with a custom window size for the
    /// backing file. Tests shrink the window to cross segment boundaries
    /// without gigabyte fixtures.
    pub(crate) fn create_with_segment_size(
        stream_id: String,
        cache_path: PathBuf,
        segment_size: u64,
    ) -> Result<Self> {
        let file = SegmentedMmapFile::with_segment_size(&cache_path, segment_size);
        file.create(0)?;
        debug!(stream_id = %stream_id, cache_path = %cache_path.display(), "stream context created");
        Ok(Self {
            stream_id,
            cache_path,
            created_at: SystemTime::now(),
            file,
            state: Mutex::new(StreamState {
                append_offset: 0,
                total_size: 0,
                status: StreamStatus::Uploading,
                last_accessed_at: Instant::now(),
            }),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `bytes` at the current append offset.
    ///
    /// Only legal while `UPLOADING`. A failed write transitions the stream
    /// to `ERROR` and surfaces the underlying error.
    pub fn append(&self, bytes: &[u8]) -> Result<usize> {
        let mut state = self.lock_state();
        state.last_accessed_at = Instant::now();
        if state.status != StreamStatus::Uploading {
            return Err(CacheError::InvalidState(state.status));
        }
        match self.file.write(state.append_offset, bytes) {
            Ok(written) => {
                state.append_offset += written as u64;
                state.total_size = state.append_offset;
                Ok(written)
            },
            Err(e) => {
                error!(stream_id = %self.stream_id, error = %e, "append failed; stream marked errored");
                state.status = StreamStatus::Error;
                Err(e)
            },
        }
    }

    /// Read up to `length` bytes at `offset` from the written prefix.
    ///
    /// Reads are status-agnostic: any connection may read what has already
    /// been written, whether or not the upload has finalized. Offsets at or
    /// past the written prefix return an empty vector.
    pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let limit = {
            let mut state = self.lock_state();
            state.last_accessed_at = Instant::now();
            state.append_offset
        };
        if length == 0 || offset >= limit {
            return Ok(Vec::new());
        }
        self.file.read(offset, length.min(limit - offset))
    }

    /// Truncate the backing file to the exact total size, flush it, and
    /// transition to `READY`. Only legal while `UPLOADING`; a second call
    /// fails and leaves the state unchanged.
    pub fn finalize(&self) -> Result<()> {
        let mut state = self.lock_state();
        state.last_accessed_at = Instant::now();
        if state.status != StreamStatus::Uploading {
            return Err(CacheError::InvalidState(state.status));
        }
        match self.file.finalize(state.total_size) {
            Ok(()) => {
                state.status = StreamStatus::Ready;
                Ok(())
            },
            Err(e) => {
                error!(stream_id = %self.stream_id, error = %e, "finalize failed; stream marked errored");
                state.status = StreamStatus::Error;
                Err(e)
            },
        }
    }

    /// Close the backing file and unlink it. Used by the registry when the
    /// context is removed; a missing file is not an error.
    pub(crate) fn destroy(&self) -> Result<()> {
        self.file.close()?;
        match std::fs::remove_file(&self.cache_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn touch(&self) {
        self.lock_state().last_accessed_at = Instant::now();
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn status(&self) -> StreamStatus {
        self.lock_state().status
    }

    /// First free byte position while uploading; equals the total size once
    /// the stream is `READY`.
    pub fn append_offset(&self) -> u64 {
        self.lock_state().append_offset
    }

    pub fn total_size(&self) -> u64 {
        self.lock_state().total_size
    }

    /// Time since the stream was last created, appended, read, or looked up.
    pub fn idle_for(&self) -> Duration {
        self.lock_state().last_accessed_at.elapsed()
    }
}

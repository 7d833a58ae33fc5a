// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stream registry: owns every live stream and arbitrates its lifecycle.
//!
//! The registry lock protects map membership only. Per-stream work runs
//! under the context lock, taken after the registry lock has been released;
//! the lock order is registry → context → file and is never reversed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{info, warn};

use crate::constants::SEGMENT_SIZE;
use crate::error::{CacheError, Result};
use crate::stream::StreamContext;

type StreamMap = HashMap<String, Arc<StreamContext>>;

/// Keyed table of live [`StreamContext`]s.
pub struct StreamRegistry {
    cache_dir: PathBuf,
    segment_size: u64,
    streams: RwLock<StreamMap>,
}

impl StreamRegistry {
    /// Create a registry rooted at `cache_dir`, creating the directory if
    /// it does not exist.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_segment_size(cache_dir, SEGMENT_SIZE)
    }

    /// A registry whose cache files use a custom segment size.
    ///
    /// Production callers use [`new`](Self::new); tests shrink the window so
    /// cross-segment reads and writes run without gigabyte fixtures.
    pub fn with_segment_size(cache_dir: impl Into<PathBuf>, segment_size: u64) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir)?;
        info!(cache_dir = %cache_dir.display(), "stream registry initialized");
        Ok(Self { cache_dir, segment_size, streams: RwLock::new(HashMap::new()) })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, StreamMap> {
        self.streams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, StreamMap> {
        self.streams.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ids become file names under the cache directory, so anything that
    /// could escape it is rejected before any filesystem work.
    fn validate_stream_id(stream_id: &str) -> Result<()> {
        let safe = !stream_id.is_empty()
            && !stream_id.contains(['/', '\\', '\0'])
            && !stream_id.contains("..");
        if safe {
            Ok(())
        } else {
            Err(CacheError::InvalidStreamId(stream_id.to_string()))
        }
    }

    fn cache_path_for(&self, stream_id: &str) -> PathBuf {
        self.cache_dir.join(format!("{stream_id}.cache"))
    }

    /// Register a new stream with an empty backing file, status `UPLOADING`.
    pub fn create_stream(&self, stream_id: &str) -> Result<Arc<StreamContext>> {
        Self::validate_stream_id(stream_id)?;
        let mut streams = self.write_lock();
        if streams.contains_key(stream_id) {
            return Err(CacheError::StreamExists(stream_id.to_string()));
        }
        let context = Arc::new(StreamContext::create_with_segment_size(
            stream_id.to_string(),
            self.cache_path_for(stream_id),
            self.segment_size,
        )?);
        streams.insert(stream_id.to_string(), Arc::clone(&context));
        drop(streams);
        info!(stream_id, "stream created");
        Ok(context)
    }

    /// Look up a stream, touching its last-accessed time.
    pub fn get_stream(&self, stream_id: &str) -> Option<Arc<StreamContext>> {
        let context = self.read_lock().get(stream_id).cloned();
        if let Some(context) = &context {
            context.touch();
        }
        context
    }

    /// Remove a stream: close its mappings and unlink the backing file.
    pub fn delete_stream(&self, stream_id: &str) -> Result<()> {
        let removed = self.write_lock().remove(stream_id);
        match removed {
            Some(context) => {
                context.destroy()?;
                info!(stream_id, "stream deleted");
                Ok(())
            },
            None => Err(CacheError::StreamMissing(stream_id.to_string())),
        }
    }

    /// Append `bytes` to the stream's upload.
    pub fn write_chunk(&self, stream_id: &str, bytes: &[u8]) -> Result<usize> {
        let context = self
            .get_stream(stream_id)
            .ok_or_else(|| CacheError::StreamMissing(stream_id.to_string()))?;
        context.append(bytes)
    }

    /// Read up to `length` bytes at `offset` from the stream.
    pub fn read_chunk(&self, stream_id: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let context = self
            .get_stream(stream_id)
            .ok_or_else(|| CacheError::StreamMissing(stream_id.to_string()))?;
        context.read(offset, length)
    }

    /// Finalize the stream: exact size on disk, flushed, `READY`.
    pub fn finalize_stream(&self, stream_id: &str) -> Result<()> {
        let context = self
            .get_stream(stream_id)
            .ok_or_else(|| CacheError::StreamMissing(stream_id.to_string()))?;
        context.finalize()
    }

    /// Snapshot of currently registered stream ids.
    pub fn list_active(&self) -> Vec<String> {
        self.read_lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_lock().is_empty()
    }

    /// Delete every stream that has been idle longer than `max_age`.
    ///
    /// Returns the number of streams removed.
    pub fn cleanup_old_streams(&self, max_age: Duration) -> usize {
        let expired: Vec<String> = self
            .read_lock()
            .iter()
            .filter(|(_, context)| context.idle_for() > max_age)
            .map(|(id, _)| id.clone())
            .collect();

        let mut removed = 0;
        for stream_id in expired {
            match self.delete_stream(&stream_id) {
                Ok(()) => {
                    info!(stream_id = %stream_id, "garbage-collected idle stream");
                    removed += 1;
                },
                // Raced with an explicit delete; nothing left to do.
                Err(CacheError::StreamMissing(_)) => {},
                Err(e) => {
                    warn!(stream_id = %stream_id, error = %e, "failed to delete idle stream");
                },
            }
        }
        removed
    }

    /// Remove every stream and its backing file.
    pub fn shutdown(&self) {
        let drained: Vec<(String, Arc<StreamContext>)> = self.write_lock().drain().collect();
        for (stream_id, context) in drained {
            if let Err(e) = context.destroy() {
                warn!(stream_id = %stream_id, error = %e, "failed to remove cache file during shutdown");
            }
        }
    }
}

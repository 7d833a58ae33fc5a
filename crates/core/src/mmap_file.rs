// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Segmented memory-mapped cache file.
//!
//! One backing file is addressed through fixed-size windows ("segments")
//! mapped lazily on first access, so a multi-gigabyte stream never has to be
//! mapped in one piece. Writers hold the exclusive lock; readers share the
//! lock and only upgrade to exclusive for the single step of mapping a
//! window that is not resident yet. Growing or shrinking the file drops all
//! mappings first, then truncates.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use memmap2::{MmapMut, MmapOptions};
use tracing::{debug, error};

use crate::constants::{BATCH_OPERATION_LIMIT, MAX_CACHE_SIZE, SEGMENT_SIZE};
use crate::error::{CacheError, Result};

struct Inner {
    file: Option<File>,
    file_size: u64,
    segments: HashMap<u64, MmapMut>,
}

/// Offset-addressed read/write over a single cache file.
///
/// All operations are safe under concurrent callers; see the module docs for
/// the locking discipline.
pub struct SegmentedMmapFile {
    path: PathBuf,
    segment_size: u64,
    inner: RwLock<Inner>,
}

impl SegmentedMmapFile {
    /// A file windowed at the production [`SEGMENT_SIZE`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_segment_size(path, SEGMENT_SIZE)
    }

    /// A file windowed at a custom segment size.
    ///
    /// Production callers use [`new`](Self::new); tests shrink the window to
    /// exercise boundary handling without gigabyte fixtures.
    ///
    /// # Panics
    ///
    /// Panics if `segment_size` is zero.
    pub fn with_segment_size(path: impl Into<PathBuf>, segment_size: u64) -> Self {
        assert!(segment_size > 0, "segment size must be non-zero");
        Self {
            path: path.into(),
            segment_size,
            inner: RwLock::new(Inner { file: None, file_size: 0, segments: HashMap::new() }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.read_lock().file_size
    }

    pub fn is_open(&self) -> bool {
        self.read_lock().file.is_some()
    }

    /// Number of currently resident segment mappings.
    pub fn mapped_segment_count(&self) -> usize {
        self.read_lock().segments.len()
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create-or-truncate the backing file, pre-extended to `initial_size`.
    pub fn create(&self, initial_size: u64) -> Result<()> {
        if initial_size > MAX_CACHE_SIZE {
            return Err(CacheError::InvalidSize { requested: initial_size, max: MAX_CACHE_SIZE });
        }

        let mut inner = self.write_lock();
        inner.segments.clear();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| {
                error!(operation = "create", path = %self.path.display(), error = %e, "failed to create cache file");
                CacheError::from(e)
            })?;
        if initial_size > 0 {
            file.set_len(initial_size).map_err(|e| {
                error!(operation = "create", path = %self.path.display(), error = %e, "failed to pre-extend cache file");
                CacheError::from(e)
            })?;
        }
        inner.file = Some(file);
        inner.file_size = initial_size;
        Ok(())
    }

    /// Open an existing backing file read-write.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.write_lock();
        if !self.path.exists() {
            return Err(CacheError::NotFound(self.path.clone()));
        }
        let file = OpenOptions::new().read(true).write(true).open(&self.path).map_err(|e| {
            error!(operation = "open", path = %self.path.display(), error = %e, "failed to open cache file");
            CacheError::from(e)
        })?;
        let len = file.metadata()?.len();
        inner.segments.clear();
        inner.file = Some(file);
        inner.file_size = len;
        Ok(())
    }

    /// Sync and unmap every segment, then close the handle. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.write_lock();
        for (index, segment) in inner.segments.drain() {
            if let Err(e) = segment.flush() {
                error!(operation = "close", segment = index, error = %e, "failed to sync segment");
            }
        }
        inner.file = None;
        Ok(())
    }

    /// Write `bytes` at `offset`, growing the file if needed.
    ///
    /// Returns the number of bytes copied. The copy proceeds low offset
    /// first, one segment at a time, with an asynchronous flush of each
    /// touched range.
    pub fn write(&self, offset: u64, bytes: &[u8]) -> Result<usize> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let len = bytes.len() as u64;
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= MAX_CACHE_SIZE)
            .ok_or(CacheError::Bounds { offset, len, max: MAX_CACHE_SIZE })?;

        let mut inner = self.write_lock();
        if inner.file.is_none() {
            return Err(CacheError::Closed);
        }
        if end > inner.file_size {
            Self::grow(&mut inner, end)?;
        }

        let mut written = 0usize;
        let mut pos = offset;
        while written < bytes.len() {
            let index = pos / self.segment_size;
            let seg_off = (pos % self.segment_size) as usize;
            let segment = Self::segment_mut(&mut inner, self.segment_size, index)?;
            let chunk = (segment.len() - seg_off).min(bytes.len() - written);
            segment[seg_off..seg_off + chunk].copy_from_slice(&bytes[written..written + chunk]);
            segment.flush_async_range(seg_off, chunk).map_err(|e| {
                error!(operation = "write", segment = index, error = %e, "async flush failed");
                CacheError::from(e)
            })?;
            written += chunk;
            pos += chunk as u64;
        }
        Ok(written)
    }

    /// Read up to `length` bytes starting at `offset`.
    ///
    /// Returns an empty vector at or past end of file; otherwise the length
    /// is clamped to the file size.
    pub fn read(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        {
            let inner = self.read_lock();
            if inner.file.is_none() {
                return Err(CacheError::Closed);
            }
            if length == 0 || offset >= inner.file_size {
                return Ok(Vec::new());
            }
            if let Some(out) = Self::try_copy(&inner, self.segment_size, offset, length) {
                return Ok(out);
            }
        }

        // A covering segment is not resident: upgrade to the exclusive lock
        // for the mapping step, then copy while still holding it.
        let mut inner = self.write_lock();
        if inner.file.is_none() {
            return Err(CacheError::Closed);
        }
        if length == 0 || offset >= inner.file_size {
            return Ok(Vec::new());
        }
        let len = length.min(inner.file_size - offset);
        let first = offset / self.segment_size;
        let last = (offset + len - 1) / self.segment_size;
        for index in first..=last {
            Self::segment_mut(&mut inner, self.segment_size, index)?;
        }
        let Some(out) = Self::try_copy(&inner, self.segment_size, offset, length) else {
            return Err(CacheError::Closed);
        };
        Ok(out)
    }

    /// Apply up to [`BATCH_OPERATION_LIMIT`] `(offset, bytes)` writes.
    ///
    /// Returns the total number of bytes copied.
    pub fn write_batch(&self, ops: &[(u64, &[u8])]) -> Result<usize> {
        if ops.len() > BATCH_OPERATION_LIMIT {
            return Err(CacheError::BatchLimit(ops.len()));
        }
        let mut total = 0;
        for (offset, bytes) in ops {
            total += self.write(*offset, bytes)?;
        }
        Ok(total)
    }

    /// Apply up to [`BATCH_OPERATION_LIMIT`] `(offset, length)` reads.
    pub fn read_batch(&self, ops: &[(u64, u64)]) -> Result<Vec<Vec<u8>>> {
        if ops.len() > BATCH_OPERATION_LIMIT {
            return Err(CacheError::BatchLimit(ops.len()));
        }
        ops.iter().map(|&(offset, length)| self.read(offset, length)).collect()
    }

    /// Truncate (or extend) the file to `new_size`, dropping all mappings.
    pub fn resize(&self, new_size: u64) -> Result<()> {
        if new_size > MAX_CACHE_SIZE {
            return Err(CacheError::InvalidSize { requested: new_size, max: MAX_CACHE_SIZE });
        }
        let mut inner = self.write_lock();
        if inner.file_size == new_size {
            return Ok(());
        }
        inner.segments.clear();
        let file = inner.file.as_ref().ok_or(CacheError::Closed)?;
        file.set_len(new_size).map_err(|e| {
            error!(operation = "resize", path = %self.path.display(), error = %e, "truncate failed");
            CacheError::from(e)
        })?;
        inner.file_size = new_size;
        debug!(path = %self.path.display(), new_size, "cache file resized");
        Ok(())
    }

    /// Truncate to the exact final size and force everything to disk.
    pub fn finalize(&self, final_size: u64) -> Result<()> {
        self.resize(final_size)?;
        self.flush()
    }

    /// Synchronously force every resident segment to disk.
    pub fn flush(&self) -> Result<()> {
        let inner = self.read_lock();
        if inner.file.is_none() {
            return Err(CacheError::Closed);
        }
        for (index, segment) in &inner.segments {
            segment.flush().map_err(|e| {
                error!(operation = "flush", segment = index, error = %e, "segment sync failed");
                CacheError::from(e)
            })?;
        }
        Ok(())
    }

    /// Map the segments covering `[offset, offset+length)` and hint the OS
    /// that they will be needed soon.
    pub fn prefetch(&self, offset: u64, length: u64) -> Result<()> {
        let mut inner = self.write_lock();
        if inner.file.is_none() {
            return Err(CacheError::Closed);
        }
        if length == 0 || offset >= inner.file_size {
            return Ok(());
        }
        let len = length.min(inner.file_size - offset);
        let first = offset / self.segment_size;
        let last = (offset + len - 1) / self.segment_size;
        for index in first..=last {
            let segment = Self::segment_mut(&mut inner, self.segment_size, index)?;
            #[cfg(unix)]
            segment.advise(memmap2::Advice::WillNeed).map_err(|e| {
                error!(operation = "prefetch", segment = index, error = %e, "madvise failed");
                CacheError::from(e)
            })?;
            #[cfg(not(unix))]
            let _ = segment;
        }
        Ok(())
    }

    /// Unmap the segments covering `[offset, offset+length)`.
    ///
    /// File contents are untouched; subsequent access re-maps on demand.
    pub fn evict(&self, offset: u64, length: u64) -> Result<()> {
        let mut inner = self.write_lock();
        if inner.file.is_none() {
            return Err(CacheError::Closed);
        }
        if length == 0 || offset >= inner.file_size {
            return Ok(());
        }
        let len = length.min(inner.file_size - offset);
        let first = offset / self.segment_size;
        let last = (offset + len - 1) / self.segment_size;
        for index in first..=last {
            inner.segments.remove(&index);
        }
        Ok(())
    }

    fn grow(inner: &mut Inner, new_size: u64) -> Result<()> {
        inner.segments.clear();
        let file = inner.file.as_ref().ok_or(CacheError::Closed)?;
        file.set_len(new_size).map_err(|e| {
            error!(operation = "grow", new_size, error = %e, "extend failed");
            CacheError::from(e)
        })?;
        inner.file_size = new_size;
        Ok(())
    }

    /// The segment at `index`, mapping it on demand.
    fn segment_mut<'a>(
        inner: &'a mut Inner,
        segment_size: u64,
        index: u64,
    ) -> Result<&'a mut MmapMut> {
        let Inner { file, file_size, segments } = inner;
        let file = file.as_ref().ok_or(CacheError::Closed)?;
        Ok(match segments.entry(index) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                vacant.insert(Self::map_segment(file, segment_size, *file_size, index)?)
            },
        })
    }

    #[allow(unsafe_code)]
    fn map_segment(file: &File, segment_size: u64, file_size: u64, index: u64) -> Result<MmapMut> {
        let start = index * segment_size;
        let len = segment_size.min(file_size.saturating_sub(start)) as usize;
        // SAFETY: the mapping never outlives `file` (both live in the same
        // `Inner`, and every resize/close drops the mappings first), and the
        // mapped region stays private to this struct.
        let mmap =
            unsafe { MmapOptions::new().offset(start).len(len).map_mut(file) }.map_err(|e| {
                error!(operation = "map", segment = index, error = %e, "mmap failed");
                CacheError::from(e)
            })?;
        Ok(mmap)
    }

    /// Copy `[offset, offset+length)` out of resident segments.
    ///
    /// Returns `None` when a covering segment is not mapped yet.
    fn try_copy(inner: &Inner, segment_size: u64, offset: u64, length: u64) -> Option<Vec<u8>> {
        let len = length.min(inner.file_size - offset);
        let mut out = vec![0u8; len as usize];
        let mut copied = 0usize;
        let mut pos = offset;
        while copied < out.len() {
            let index = pos / segment_size;
            let seg_off = (pos % segment_size) as usize;
            let segment = inner.segments.get(&index)?;
            let chunk = (segment.len() - seg_off).min(out.len() - copied);
            out[copied..copied + chunk].copy_from_slice(&segment[seg_off..seg_off + chunk]);
            copied += chunk;
            pos += chunk as u64;
        }
        Some(out)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_file(segment_size: u64) -> (tempfile::TempDir, SegmentedMmapFile) {
        let dir = tempfile::tempdir().unwrap();
        let file = SegmentedMmapFile::with_segment_size(dir.path().join("test.cache"), segment_size);
        (dir, file)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn round_trip_across_segments() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let data = pattern(200);
        assert_eq!(file.write(0, &data).unwrap(), 200);
        assert_eq!(file.size(), 200);

        assert_eq!(file.read(0, 200).unwrap(), data);
        // Arbitrary partitions over the same range.
        assert_eq!(file.read(0, 64).unwrap(), data[..64]);
        assert_eq!(file.read(64, 64).unwrap(), data[64..128]);
        assert_eq!(file.read(100, 50).unwrap(), data[100..150]);
    }

    #[test]
    fn write_exactly_at_segment_boundary() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let data = pattern(64);
        assert_eq!(file.write(64, &data).unwrap(), 64);
        assert_eq!(file.size(), 128);
        assert_eq!(file.read(64, 64).unwrap(), data);
        // The hole before the write reads back as zeros.
        assert_eq!(file.read(0, 64).unwrap(), vec![0u8; 64]);
    }

    #[test]
    fn write_straddling_two_boundaries() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let data = pattern(140);
        assert_eq!(file.write(60, &data).unwrap(), 140);
        assert_eq!(file.read(60, 140).unwrap(), data);
        assert!(file.mapped_segment_count() >= 3);
    }

    #[test]
    fn read_past_end_returns_empty() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        file.write(0, &pattern(10)).unwrap();
        assert!(file.read(10, 5).unwrap().is_empty());
        assert!(file.read(1000, 5).unwrap().is_empty());
    }

    #[test]
    fn read_clamps_to_file_size() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let data = pattern(10);
        file.write(0, &data).unwrap();
        assert_eq!(file.read(5, 100).unwrap(), data[5..]);
    }

    #[test]
    fn zero_length_ops_are_noops() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        assert_eq!(file.write(0, &[]).unwrap(), 0);
        assert!(file.read(0, 0).unwrap().is_empty());
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn write_past_max_cache_size_is_rejected() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let err = file.write(MAX_CACHE_SIZE, b"x").unwrap_err();
        assert!(matches!(err, CacheError::Bounds { .. }));
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn create_rejects_oversize() {
        let (_dir, file) = temp_file(64);
        let err = file.create(MAX_CACHE_SIZE + 1).unwrap_err();
        assert!(matches!(err, CacheError::InvalidSize { .. }));
    }

    #[test]
    fn open_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let file = SegmentedMmapFile::with_segment_size(dir.path().join("absent.cache"), 64);
        assert!(matches!(file.open().unwrap_err(), CacheError::NotFound(_)));
    }

    #[test]
    fn reopen_preserves_contents() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let data = pattern(150);
        file.write(0, &data).unwrap();
        file.close().unwrap();
        file.open().unwrap();
        assert_eq!(file.size(), 150);
        assert_eq!(file.read(0, 150).unwrap(), data);
    }

    #[test]
    fn close_is_idempotent() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        file.close().unwrap();
        file.close().unwrap();
        assert!(!file.is_open());
        assert!(matches!(file.write(0, b"x").unwrap_err(), CacheError::Closed));
    }

    #[test]
    fn resize_truncates_and_drops_mappings() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        file.write(0, &pattern(130)).unwrap();
        assert!(file.mapped_segment_count() > 0);
        file.resize(50).unwrap();
        assert_eq!(file.size(), 50);
        assert_eq!(file.mapped_segment_count(), 0);
        assert!(file.read(50, 10).unwrap().is_empty());
        assert_eq!(file.read(0, 50).unwrap(), pattern(130)[..50]);
    }

    #[test]
    fn finalize_truncates_and_flushes() {
        let (_dir, file) = temp_file(64);
        file.create(256).unwrap();
        let data = pattern(100);
        file.write(0, &data).unwrap();
        file.finalize(100).unwrap();
        assert_eq!(file.size(), 100);
        assert_eq!(std::fs::metadata(file.path()).unwrap().len(), 100);
        assert_eq!(file.read(0, 100).unwrap(), data);
    }

    #[test]
    fn batch_limit_is_enforced() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let reads = vec![(0u64, 1u64); BATCH_OPERATION_LIMIT + 1];
        assert!(matches!(file.read_batch(&reads).unwrap_err(), CacheError::BatchLimit(_)));

        let payload = pattern(8);
        let writes: Vec<(u64, &[u8])> =
            (0..BATCH_OPERATION_LIMIT + 1).map(|i| (i as u64 * 8, payload.as_slice())).collect();
        assert!(matches!(file.write_batch(&writes).unwrap_err(), CacheError::BatchLimit(_)));
    }

    #[test]
    fn batch_round_trip() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let a = pattern(30);
        let b = pattern(70);
        let total = file.write_batch(&[(0, a.as_slice()), (100, b.as_slice())]).unwrap();
        assert_eq!(total, 100);
        let out = file.read_batch(&[(0, 30), (100, 70)]).unwrap();
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn evict_then_read_remaps() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let data = pattern(128);
        file.write(0, &data).unwrap();
        file.evict(0, 128).unwrap();
        assert_eq!(file.mapped_segment_count(), 0);
        assert_eq!(file.read(0, 128).unwrap(), data);
        assert!(file.mapped_segment_count() > 0);
    }

    #[test]
    fn prefetch_maps_covering_segments() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        file.write(0, &pattern(200)).unwrap();
        file.evict(0, 200).unwrap();
        file.prefetch(0, 200).unwrap();
        assert_eq!(file.mapped_segment_count(), 4);
    }

    #[test]
    fn grow_on_write_preserves_earlier_data() {
        let (_dir, file) = temp_file(64);
        file.create(0).unwrap();
        let first = pattern(40);
        file.write(0, &first).unwrap();
        let second = pattern(64);
        file.write(200, &second).unwrap();
        assert_eq!(file.size(), 264);
        assert_eq!(file.read(0, 40).unwrap(), first);
        assert_eq!(file.read(200, 64).unwrap(), second);
    }
}

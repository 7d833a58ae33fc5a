// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for the cache engine.
//!
//! Every fallible operation in this crate returns [`Result`]; the variants
//! map one-to-one onto the failure classes a caller can meaningfully react
//! to (reject the request, report stream state, or surface an I/O fault).

use std::path::PathBuf;

use thiserror::Error;

use crate::stream::StreamStatus;

/// Main error type for cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A requested file size falls outside the allowed range.
    #[error("invalid cache size {requested} (max {max} bytes)")]
    InvalidSize { requested: u64, max: u64 },

    /// The backing file does not exist.
    #[error("cache file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file handle has been closed; the operation cannot proceed.
    #[error("cache file is closed")]
    Closed,

    /// Offset/length fall outside the addressable range of the file.
    #[error("out of bounds: offset {offset} + length {len} exceeds {max} bytes")]
    Bounds { offset: u64, len: u64, max: u64 },

    /// A batch call exceeded the per-call operation limit.
    #[error("batch of {0} operations exceeds the batch operation limit")]
    BatchLimit(usize),

    /// The stream's state machine forbids this operation.
    ///
    /// Examples: appending to a READY stream, finalizing twice.
    #[error("operation not allowed while stream is {0}")]
    InvalidState(StreamStatus),

    /// A stream with this id is already registered.
    #[error("stream already exists: {0}")]
    StreamExists(String),

    /// No stream with this id is registered.
    #[error("stream not found: {0}")]
    StreamMissing(String),

    /// The stream id is empty or not filesystem-safe.
    #[error("invalid stream id: {0:?}")]
    InvalidStreamId(String),

    /// I/O error (map, flush, truncate, copy, unlink).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for Results using [`CacheError`].
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::StreamExists("s1".to_string());
        assert_eq!(err.to_string(), "stream already exists: s1");

        let err = CacheError::InvalidState(StreamStatus::Ready);
        assert_eq!(err.to_string(), "operation not allowed while stream is READY");

        let err = CacheError::Bounds { offset: 8, len: 16, max: 8 };
        assert_eq!(err.to_string(), "out of bounds: offset 8 + length 16 exceeds 8 bytes");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let err: CacheError = io_err.into();
        assert!(err.to_string().contains("I/O error"));
        assert!(err.to_string().contains("no such file"));
    }
}

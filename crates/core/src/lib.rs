// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! StreamVault Core - Segmented mmap cache files, stream lifecycle and buffer pooling.
//!
//! This crate holds the storage engine behind the StreamVault server:
//!
//! ## Core Modules
//!
//! - [`mmap_file`]: One cache file addressed as lazily-mapped fixed-size windows
//! - [`stream`]: Per-stream metadata and the UPLOADING → READY | ERROR state machine
//! - [`registry`]: Keyed table of live streams, lifecycle arbitration, GC sweep
//! - [`buffer_pool`]: Bounded pool of uniform receive buffers
//! - [`constants`]: Segment sizing and operational limits
//! - [`error`]: Error types and handling
//!
//! The registry is the front door: sessions create a stream, append chunks
//! while it is uploading, finalize it, and read any written prefix at random
//! offsets. Locks are always taken registry → stream → file, never reversed.

// Module declarations
pub mod buffer_pool;
pub mod constants;
pub mod error;
pub mod mmap_file;
pub mod registry;
pub mod stream;

// Convenience re-exports for commonly used types

// Error handling
pub use error::{CacheError, Result};

// Storage engine
pub use mmap_file::SegmentedMmapFile;

// Stream lifecycle
pub use registry::StreamRegistry;
pub use stream::{StreamContext, StreamStatus};

// Buffer pooling
pub use buffer_pool::{BufferPool, PoolStats};

// Limits
pub use constants::{BATCH_OPERATION_LIMIT, MAX_CACHE_SIZE, SEGMENT_SIZE};

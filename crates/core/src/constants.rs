// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Sizing constants for the cache engine.

/// Size of one mapped window onto a cache file (1 GiB).
pub const SEGMENT_SIZE: u64 = 1024 * 1024 * 1024;

/// Upper bound on a single cache file (8 GiB). Writes and resizes past this
/// are rejected on entry, before any file system work happens.
pub const MAX_CACHE_SIZE: u64 = 8 * SEGMENT_SIZE;

/// Maximum number of operations accepted by a single batch read/write call.
pub const BATCH_OPERATION_LIMIT: usize = 1000;

/// Size of each pooled receive buffer (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Number of receive buffers the pool retains.
pub const DEFAULT_POOL_CAPACITY: usize = 100;

/// Streams idle longer than this many hours are reclaimed by the GC sweep.
pub const DEFAULT_STREAM_TTL_HOURS: u64 = 24;

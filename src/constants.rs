// src/constants.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

/// OS page size assumed by the aligned buffer pool and the calculator's
/// chunk-size search.
pub const PAGE_SIZE: i64 = 4096;

/// Block-device sector size. All AIO read offsets and sizes are aligned
/// to this.
pub const SECTOR_SIZE: i64 = 512;

/// Upper bound on `chunk_size_b` considered by the parameter calculator.
pub const MAX_CHUNK_SIZE: i64 = PAGE_SIZE * 16;

/// Number of batch blocks kept in flight (one filling/ready, one draining).
pub const NUM_BATCH_BLOCKS: i64 = 2;

/// Maximum number of in-flight AIO read requests per worker.
pub const AIO_MAX_BATCH_SIZE: usize = 2048;

/// Per-call poll timeout for the AIO completion-reap loop.
pub const AIO_REAP_TIMEOUT: Duration = Duration::from_millis(100);

/// Minimum valid row size, in bytes.
pub const MIN_ROW_SIZE: i64 = 16;

/// Largest power-of-two thread count accepted by `SamplerConfig`.
pub const MAX_THREADS: i64 = 64;

/// `SamplerConfig::seed` default carried over from the original's
/// `SamplerConfig` C++ default member initializer.
pub const DEFAULT_SEED: u64 = 123;

// src/error.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error taxonomy for construction and, where recoverable, I/O failures.
//!
//! Runtime AIO submission/reap failures are treated as fatal by the
//! worker (matching the original's `abort()`-on-error behavior) rather
//! than being surfaced through this enum on every call;
//! `SamplerError::Io` and `SamplerError::ShortRead` exist for the
//! construction-time open/fadvise path and for tests that want to assert
//! on a worker failure captured via `std::panic::catch_unwind`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("invalid configuration: {0}")]
    BadConfig(String),

    #[error(
        "no feasible (num_batches_in_block, chunk_size_b) pair found for file_size_b={file_size_b}, \
         row_size_b={row_size_b}, memory_usage_limit_b={memory_usage_limit_b}; increase memory_usage_limit_b"
    )]
    PlanInfeasible {
        file_size_b: i64,
        row_size_b: i64,
        memory_usage_limit_b: i64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: i64,
        expected: i64,
        actual: i64,
    },
}

pub type Result<T> = std::result::Result<T, SamplerError>;

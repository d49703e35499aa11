// src/lib.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Random-sample batch streaming over a flat row-major tensor file on
//! NVMe, via direct I/O and asynchronous reads.
//!
//! A [`Sampler`] opens a fixed-row-size binary file with `O_DIRECT`,
//! computes a read/batch plan that fits a caller-supplied memory budget,
//! and streams uniformly-sampled rows through a double-buffered pair of
//! batch blocks kept full by a pool of `io_uring`-backed worker threads.
//! It trades strict uniformity (the file's trailing partial chunk is
//! dropped) and cryptographic randomness for throughput: this is meant
//! to feed a training loop's shuffle buffer, not a statistical sampler.

pub mod batch_block;
pub mod buffer_pool;
pub mod calculator;
pub mod chunk_sampler;
pub mod constants;
pub mod error;
pub mod lcg;
pub mod memcpy;
pub mod sampler;
pub mod util;
pub mod work_queue;
pub mod worker;

pub use buffer_pool::AllocatorPair;
pub use calculator::{SamplerConfig, SamplingParameters, TensorDescription};
pub use error::{Result, SamplerError};
pub use sampler::Sampler;

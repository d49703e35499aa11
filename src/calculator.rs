// src/calculator.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parameter calculator: turns a tensor description and a memory budget
//! into a valid read/batch plan.
//!
//! Ported from `original_source/lib/src/calculator.h`. The search order,
//! acceptance conditions, and the (intentionally non-obvious) wasted-ratio
//! definition are preserved exactly — see the Open Questions note below.

use crate::constants::{
    DEFAULT_SEED, MAX_CHUNK_SIZE, MAX_THREADS, MIN_ROW_SIZE, NUM_BATCH_BLOCKS, PAGE_SIZE,
    SECTOR_SIZE,
};
use crate::error::{Result, SamplerError};
use crate::util::{align_up, is_power_of_two, round_up_to_pow2};

/// Immutable description of the on-disk tensor being sampled.
#[derive(Debug, Clone)]
pub struct TensorDescription {
    pub num_rows: i64,
    pub row_size_b: i64,
    pub file_path: String,
}

impl TensorDescription {
    pub fn new(num_rows: i64, row_size_b: i64, file_path: impl Into<String>) -> Self {
        Self {
            num_rows,
            row_size_b,
            file_path: file_path.into(),
        }
    }

    pub fn file_size_b(&self) -> i64 {
        self.num_rows * self.row_size_b
    }
}

/// Immutable sampler knobs supplied by the caller.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub max_batch_elements: i64,
    pub max_num_threads: i64,
    pub memory_usage_limit_b: i64,
    pub seed: u64,
}

impl SamplerConfig {
    pub fn new(
        max_batch_elements: i64,
        max_num_threads: i64,
        memory_usage_limit_b: i64,
        seed: u64,
    ) -> Self {
        Self {
            max_batch_elements,
            max_num_threads,
            memory_usage_limit_b,
            seed,
        }
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            max_batch_elements: 0,
            max_num_threads: 1,
            memory_usage_limit_b: 0,
            seed: DEFAULT_SEED,
        }
    }
}

/// Computed plan: chunk size, block capacity, and chunk count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingParameters {
    pub chunk_size_b: i64,
    pub max_chunk_size_b: i64,
    pub num_batches_in_block: i64,
    pub batch_size_b: i64,
    pub num_chunks: i64,
}

fn validate(file_size_b: i64, row_size_b: i64, config: &SamplerConfig) -> Result<()> {
    if row_size_b <= 0 || file_size_b % row_size_b != 0 {
        return Err(SamplerError::BadConfig(format!(
            "file_size_b ({file_size_b}) is not a multiple of row_size_b ({row_size_b})"
        )));
    }
    if row_size_b < MIN_ROW_SIZE {
        return Err(SamplerError::BadConfig(format!(
            "row_size_b ({row_size_b}) is smaller than the minimum ({MIN_ROW_SIZE})"
        )));
    }
    if row_size_b > MAX_CHUNK_SIZE {
        return Err(SamplerError::BadConfig(format!(
            "row_size_b ({row_size_b}) exceeds MAX_CHUNK_SIZE ({MAX_CHUNK_SIZE})"
        )));
    }
    if config.max_num_threads <= 0 || config.max_num_threads > MAX_THREADS {
        return Err(SamplerError::BadConfig(format!(
            "max_num_threads ({}) must be in [1, {MAX_THREADS}]",
            config.max_num_threads
        )));
    }
    if !is_power_of_two(config.max_num_threads) {
        return Err(SamplerError::BadConfig(format!(
            "max_num_threads ({}) must be a power of two",
            config.max_num_threads
        )));
    }
    if config.max_batch_elements <= 0 || config.max_batch_elements % config.max_num_threads != 0 {
        return Err(SamplerError::BadConfig(format!(
            "max_batch_elements ({}) must be a positive multiple of max_num_threads ({})",
            config.max_batch_elements, config.max_num_threads
        )));
    }

    let batch_size_b = row_size_b * config.max_batch_elements;
    if batch_size_b > file_size_b {
        return Err(SamplerError::BadConfig(format!(
            "max_batch_elements ({}) is too large for this file ({file_size_b} bytes)",
            config.max_batch_elements
        )));
    }
    if batch_size_b * NUM_BATCH_BLOCKS > config.memory_usage_limit_b {
        return Err(SamplerError::BadConfig(format!(
            "max_batch_elements ({}) is too large for memory_usage_limit_b ({})",
            config.max_batch_elements, config.memory_usage_limit_b
        )));
    }

    Ok(())
}

/// Compute a valid [`SamplingParameters`] plan, or fail with
/// [`SamplerError::PlanInfeasible`] / [`SamplerError::BadConfig`].
pub fn calculate(
    file_size_b: i64,
    row_size_b: i64,
    config: &SamplerConfig,
) -> Result<SamplingParameters> {
    validate(file_size_b, row_size_b, config)?;

    let batch_size_b = row_size_b * config.max_batch_elements;

    // Start the downward search at the largest power-of-two block capacity
    // that both the 2^15 ceiling and the memory budget allow, rounded up
    // to the next power of two so the starting point is itself a valid
    // candidate (original_source/lib/src/calculator.h: round_up_to_pow2).
    let max_num_batches_in_block =
        (1i64 << 15).min(config.memory_usage_limit_b / NUM_BATCH_BLOCKS / batch_size_b);
    if max_num_batches_in_block < 4 {
        return Err(SamplerError::PlanInfeasible {
            file_size_b,
            row_size_b,
            memory_usage_limit_b: config.memory_usage_limit_b,
        });
    }

    // round_up_to_pow2 may overshoot max_num_batches_in_block when the
    // latter isn't itself a power of two; the original does not clamp
    // this away — the first search iteration simply fails condition 2
    // (used_memory_b < memory_usage_limit_b) for every chunk_size_b and
    // the loop halves down to a fitting value on the next pass.
    let mut num_batches_in_block = round_up_to_pow2(max_num_batches_in_block);

    while num_batches_in_block >= 4 {
        let mut chunk_size_b = PAGE_SIZE;
        while chunk_size_b <= MAX_CHUNK_SIZE {
            let used_memory_b = num_batches_in_block * batch_size_b * NUM_BATCH_BLOCKS;
            let reminder_b = if chunk_size_b % row_size_b == 0 {
                0
            } else {
                row_size_b - (chunk_size_b % row_size_b)
            };
            let additional_read_size_b = if reminder_b == 0 {
                0
            } else {
                align_up(reminder_b, SECTOR_SIZE)
            };
            let total_read_size_b = additional_read_size_b + chunk_size_b;
            // Preserved as-is from the original: numerator is
            // `additional_read_size_b - reminder_b`, not the padding
            // itself. See SPEC_FULL.md / DESIGN.md Open Questions.
            let wasted_b = additional_read_size_b - reminder_b;
            let wasted_ratio = wasted_b as f64 / total_read_size_b as f64;

            let max_chunk_size_b =
                align_up(align_up(chunk_size_b, row_size_b) + SECTOR_SIZE * 2, SECTOR_SIZE);
            let num_chunks = file_size_b / chunk_size_b - 1;
            let max_num_elements_in_chunk = max_chunk_size_b / row_size_b;

            if chunk_size_b >= row_size_b
                && used_memory_b < config.memory_usage_limit_b
                && wasted_ratio <= 0.05
                && num_batches_in_block >= max_num_elements_in_chunk
            {
                if num_chunks * chunk_size_b != file_size_b {
                    let num_ignored_elements =
                        (file_size_b - (num_chunks - 1) * chunk_size_b) / row_size_b;
                    tracing::info!(
                        num_ignored_elements,
                        "trailing rows will never be sampled (last partial chunk dropped)"
                    );
                }

                tracing::info!(
                    chunk_size_b,
                    max_chunk_size_b,
                    num_batches_in_block,
                    num_chunks,
                    wasted_ratio,
                    "computed sampling parameters"
                );

                return Ok(SamplingParameters {
                    chunk_size_b,
                    max_chunk_size_b,
                    num_batches_in_block,
                    batch_size_b,
                    num_chunks,
                });
            }

            chunk_size_b += PAGE_SIZE;
        }
        num_batches_in_block >>= 1;
    }

    Err(SamplerError::PlanInfeasible {
        file_size_b,
        row_size_b,
        memory_usage_limit_b: config.memory_usage_limit_b,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_tracing() {
        use tracing_subscriber::{fmt, EnvFilter};
        let _ = fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
    }

    #[test]
    fn exact_divisor_scenario() {
        init_tracing();
        // 4 KiB rows x 1024 rows, max_batch_elements=32, single thread, 16 MiB budget.
        let config = SamplerConfig::new(32, 1, 16 * 1024 * 1024, 7);
        let file_size = 4096 * 1024;
        let params = calculate(file_size, 4096, &config).unwrap();
        assert_eq!(params.chunk_size_b, 4096);
        assert!(params.num_batches_in_block >= 32);
        assert_eq!(params.num_chunks, file_size / 4096 - 1);
    }

    #[test]
    fn row_size_24_extends_tail_by_one_sector() {
        init_tracing();
        let config = SamplerConfig::new(64, 4, 64 * 1024 * 1024, 0);
        let file_size = 24 * 1_000_000;
        let params = calculate(file_size, 24, &config).unwrap();
        assert!(matches!(params.chunk_size_b, 12288 | 24576));
    }

    #[test]
    fn plan_infeasible_when_block_count_too_small() {
        init_tracing();
        // row_size_b just under MAX_CHUNK_SIZE with a memory budget that
        // only affords 3 batches per block (< the minimum of 4).
        let row_size_b = 65520;
        let memory_usage_limit_b = row_size_b * 2 * 3;
        let config = SamplerConfig::new(1, 1, memory_usage_limit_b, 0);
        let file_size = row_size_b * 1_000_000;
        let result = calculate(file_size, row_size_b, &config);
        assert!(matches!(result, Err(SamplerError::PlanInfeasible { .. })));
    }

    #[test]
    fn final_partial_chunk_is_dropped() {
        init_tracing();
        let config = SamplerConfig::new(16, 1, 16 * 1024 * 1024, 0);
        // 1025 chunks worth of rows, but only a full multiple of chunk_size_b is sampled.
        let file_size = 1025 * 4096;
        let params = calculate(file_size, 4096, &config).unwrap();
        assert_eq!(params.chunk_size_b, 4096);
        assert_eq!(params.num_chunks, 1024);
        assert!(params.num_chunks * params.chunk_size_b <= file_size);
    }

    #[test]
    fn rejects_non_power_of_two_thread_count() {
        let config = SamplerConfig::new(30, 3, 1024 * 1024, 0);
        let result = calculate(4096 * 100, 4096, &config);
        assert!(matches!(result, Err(SamplerError::BadConfig(_))));
    }
}

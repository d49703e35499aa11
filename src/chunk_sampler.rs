// src/chunk_sampler.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Uniform draws over `[0, num_chunks)`. Ported from
//! `original_source/lib/src/worker.h`'s `ChunkSampler`, which seeds a
//! `std::mt19937_64` per worker thread and takes `rng() % num_chunks`.
//! No rejection sampling: the original accepts the resulting small bias
//! toward low indices rather than pay for an unbiased range draw, and we
//! preserve that (see SPEC_FULL.md Non-goals: no strong statistical
//! randomness guarantee).

use rand_mt::Mt19937GenRand64;

pub struct ChunkSampler {
    rng: Mt19937GenRand64,
    num_chunks: i64,
}

impl ChunkSampler {
    pub fn new(thread_index: u64, seed: u64, num_chunks: i64) -> Self {
        assert!(num_chunks > 0);
        Self {
            rng: Mt19937GenRand64::new(seed.wrapping_add(thread_index)),
            num_chunks,
        }
    }

    pub fn next(&mut self) -> i64 {
        (self.rng.next_u64() % self.num_chunks as u64) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draws_stay_in_range() {
        let mut sampler = ChunkSampler::new(0, 123, 17);
        for _ in 0..1000 {
            let idx = sampler.next();
            assert!(idx >= 0 && idx < 17);
        }
    }

    #[test]
    fn distinct_thread_indices_diverge() {
        let mut a = ChunkSampler::new(0, 123, 1 << 20);
        let mut b = ChunkSampler::new(1, 123, 1 << 20);
        let seq_a: Vec<i64> = (0..8).map(|_| a.next()).collect();
        let seq_b: Vec<i64> = (0..8).map(|_| b.next()).collect();
        assert_ne!(seq_a, seq_b);
    }

    #[test]
    fn same_seed_and_thread_index_reproduce() {
        let mut a = ChunkSampler::new(3, 42, 1000);
        let mut b = ChunkSampler::new(3, 42, 1000);
        for _ in 0..50 {
            assert_eq!(a.next(), b.next());
        }
    }
}

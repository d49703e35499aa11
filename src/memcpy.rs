// src/memcpy.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row-scatter copy paths. Ported from `original_source/lib/src/memcpy.h`:
//! a plain byte copy, and an AVX2 non-temporal streaming copy used when
//! the row size is large enough and 32-byte aligned to actually benefit
//! from bypassing the cache.

/// True when `row_size_b` is large and aligned enough that the
/// non-temporal AVX2 path pays for itself, matching the threshold the
/// original applies before choosing `avx2nt_memcpy` over a plain copy.
pub fn should_use_streaming_copy(row_size_b: i64) -> bool {
    row_size_b >= 1024 && row_size_b % 32 == 0 && is_x86_feature_detected()
}

#[cfg(target_arch = "x86_64")]
fn is_x86_feature_detected() -> bool {
    is_x86_feature_detected!("avx2")
}

#[cfg(not(target_arch = "x86_64"))]
fn is_x86_feature_detected() -> bool {
    false
}

/// Copy `len` bytes from `src` to `dst`, choosing the streaming path when
/// `should_use_streaming_copy(len as i64)` holds.
///
/// # Safety
/// `src` and `dst` must each be valid for `len` bytes and must not
/// overlap.
pub unsafe fn smart_memcpy(dst: *mut u8, src: *const u8, len: usize) {
    #[cfg(target_arch = "x86_64")]
    {
        if len >= 1024 && len % 32 == 0 && is_x86_feature_detected() {
            avx2_streaming_copy(dst, src, len);
            return;
        }
    }
    std::ptr::copy_nonoverlapping(src, dst, len);
}

/// AVX2 non-temporal streaming copy: aligned 32-byte loads/stores with
/// `sfence` at the end so the writes are globally visible before the
/// caller treats the destination as ready.
///
/// # Safety
/// `len` must be a multiple of 32; `src`/`dst` must be valid for `len`
/// bytes and must not overlap.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn avx2_streaming_copy(dst: *mut u8, src: *const u8, len: usize) {
    use std::arch::x86_64::{_mm256_loadu_si256, _mm256_stream_si256, _mm_sfence};

    debug_assert_eq!(len % 32, 0);
    let num_lanes = len / 32;
    let src = src as *const std::arch::x86_64::__m256i;
    let dst = dst as *mut std::arch::x86_64::__m256i;

    for i in 0..num_lanes {
        let lane = _mm256_loadu_si256(src.add(i));
        _mm256_stream_si256(dst.add(i), lane);
    }
    _mm_sfence();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_copy_path_is_correct() {
        let src = vec![7u8; 100];
        let mut dst = vec![0u8; 100];
        unsafe { smart_memcpy(dst.as_mut_ptr(), src.as_ptr(), 100) };
        assert_eq!(src, dst);
    }

    #[test]
    fn streaming_eligible_copy_is_correct() {
        let src: Vec<u8> = (0..2048u32).map(|i| (i % 256) as u8).collect();
        let mut dst = vec![0u8; 2048];
        unsafe { smart_memcpy(dst.as_mut_ptr(), src.as_ptr(), 2048) };
        assert_eq!(src, dst);
    }

    #[test]
    fn streaming_threshold_requires_size_and_alignment() {
        assert!(!should_use_streaming_copy(512));
        assert!(!should_use_streaming_copy(1025));
    }
}

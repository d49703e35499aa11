// src/buffer_pool.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Page-aligned backing storage for the two batch blocks.
//!
//! Ported from `original_source/lib/src/batch_block.h`'s `BatchBlocks`
//! constructor, which allocates one slab big enough for both blocks and
//! carves it in half. The allocator itself is injected (the original
//! takes a pair of C function pointers so callers can swap in a NUMA- or
//! huge-page-aware allocator); we keep that indirection as
//! [`AllocatorPair`] rather than hard-coding `std::alloc`.

use crate::constants::PAGE_SIZE;
use crate::util::align_up_ptr;
use std::alloc::{alloc, dealloc, Layout};

/// Injected `(alloc, free)` pair, mirroring the original's allocator
/// function-pointer pair. Defaults to the global allocator via
/// [`AllocatorPair::system`].
pub struct AllocatorPair {
    alloc: Box<dyn Fn(usize) -> *mut u8 + Send + Sync>,
    free: Box<dyn Fn(*mut u8, usize) + Send + Sync>,
}

impl AllocatorPair {
    pub fn new(
        alloc: impl Fn(usize) -> *mut u8 + Send + Sync + 'static,
        free: impl Fn(*mut u8, usize) + Send + Sync + 'static,
    ) -> Self {
        Self {
            alloc: Box::new(alloc),
            free: Box::new(free),
        }
    }

    /// Page-aligned allocation via the global allocator.
    pub fn system() -> Self {
        Self::new(
            |size| unsafe {
                let layout = Layout::from_size_align(size, PAGE_SIZE as usize)
                    .expect("buffer pool layout");
                let ptr = alloc(layout);
                assert!(!ptr.is_null(), "buffer pool allocation of {size} bytes failed");
                ptr
            },
            |ptr, size| unsafe {
                let layout = Layout::from_size_align(size, PAGE_SIZE as usize)
                    .expect("buffer pool layout");
                dealloc(ptr, layout);
            },
        )
    }
}

/// One page-aligned slab sized for two batch blocks of `block_size_b`
/// bytes each, plus one page of slop so both halves can be independently
/// page-aligned after carving.
pub struct BatchBlockPool {
    allocator: AllocatorPair,
    raw: *mut u8,
    raw_size: usize,
    block_size_b: i64,
}

// SAFETY: `raw` is an owned heap allocation; the pool hands out raw
// pointers into it but does not itself alias mutable access across
// threads (each batch block's slice is used by a single worker/consumer
// at a time, synchronized through the handoff queue).
unsafe impl Send for BatchBlockPool {}
unsafe impl Sync for BatchBlockPool {}

impl BatchBlockPool {
    /// `block_size_b` is `batch_size_b * num_batches_in_block` (the full
    /// capacity of one block, not one batch).
    pub fn new(block_size_b: i64, allocator: AllocatorPair) -> Self {
        assert!(block_size_b > 0);
        let raw_size = (block_size_b as usize) * 2 + PAGE_SIZE as usize;
        let raw = (allocator.alloc)(raw_size);
        Self {
            allocator,
            raw,
            raw_size,
            block_size_b,
        }
    }

    /// Page-aligned pointer to block `index` (0 or 1).
    pub fn block_ptr(&self, index: usize) -> *mut u8 {
        assert!(index < 2);
        let base = align_up_ptr(self.raw, PAGE_SIZE as usize);
        unsafe { base.add(index * self.block_size_b as usize) }
    }

    pub fn block_size_b(&self) -> i64 {
        self.block_size_b
    }
}

impl Drop for BatchBlockPool {
    fn drop(&mut self) {
        (self.allocator.free)(self.raw, self.raw_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_page_aligned_and_non_overlapping() {
        let pool = BatchBlockPool::new(64 * 1024, AllocatorPair::system());
        let a = pool.block_ptr(0) as usize;
        let b = pool.block_ptr(1) as usize;
        assert_eq!(a % PAGE_SIZE as usize, 0);
        assert_eq!(b % PAGE_SIZE as usize, 0);
        assert!(b >= a + 64 * 1024);
    }

    #[test]
    fn custom_allocator_is_invoked_exactly_once_each() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let alloc_calls = Arc::new(AtomicUsize::new(0));
        let free_calls = Arc::new(AtomicUsize::new(0));

        let a1 = alloc_calls.clone();
        let f1 = free_calls.clone();
        let allocator = AllocatorPair::new(
            move |size| {
                a1.fetch_add(1, Ordering::SeqCst);
                unsafe {
                    let layout = Layout::from_size_align(size, PAGE_SIZE as usize).unwrap();
                    alloc(layout)
                }
            },
            move |ptr, size| {
                f1.fetch_add(1, Ordering::SeqCst);
                unsafe {
                    let layout = Layout::from_size_align(size, PAGE_SIZE as usize).unwrap();
                    dealloc(ptr, layout);
                }
            },
        );

        {
            let _pool = BatchBlockPool::new(4096, allocator);
            assert_eq!(alloc_calls.load(Ordering::SeqCst), 1);
            assert_eq!(free_calls.load(Ordering::SeqCst), 0);
        }
        assert_eq!(free_calls.load(Ordering::SeqCst), 1);
    }
}

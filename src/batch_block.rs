// src/batch_block.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Batch blocks and the blocking handoff queue between workers and the
//! coordinator. Ported from `original_source/lib/src/batch_block.h` and
//! `blocking_queue.h`.
//!
//! The original's `BlockingQueue` is a mutex + condition variable + a
//! `std::queue` + an atomic `valid` flag that `invalidate()` can flip
//! more than once (every waiter wakes, sees `!valid`, and returns
//! without an item). A channel's one-shot disconnect doesn't model that
//! re-observable, idempotent shutdown signal, so this is a hand-rolled
//! `Mutex`/`Condvar` queue rather than `std::sync::mpsc`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One double-buffered slot of sampled rows.
///
/// `buffer` points into a [`crate::buffer_pool::BatchBlockPool`] slab and
/// is valid for the pool's lifetime; `BatchBlock` itself borrows it
/// rather than owning the allocation.
pub struct BatchBlock {
    pub row_size_b: i64,
    pub num_samples: i64,
    pub read_idx: i64,
    pub buffer: *mut u8,
}

// SAFETY: the buffer is handed off between exactly one producer (the
// worker pool filling it) and one consumer (the coordinator draining it
// via `next_batch`) at a time, serialized by `HandoffQueue`.
unsafe impl Send for BatchBlock {}

impl BatchBlock {
    pub fn new(row_size_b: i64, num_samples: i64, buffer: *mut u8) -> Self {
        Self {
            row_size_b,
            num_samples,
            read_idx: 0,
            buffer,
        }
    }

    pub fn samples_left(&self) -> i64 {
        self.num_samples - self.read_idx
    }

    /// Pointer to the next unread row, and advance `read_idx` by `rows`.
    pub fn take(&mut self, rows: i64) -> *const u8 {
        assert!(rows <= self.samples_left(), "batch block underflow");
        let ptr = unsafe { self.buffer.add((self.read_idx * self.row_size_b) as usize) };
        self.read_idx += rows;
        ptr as *const u8
    }

    pub fn reset(&mut self) {
        self.read_idx = 0;
    }
}

/// Bounded MPMC blocking queue with a repeatable `invalidate()`,
/// mirroring `original_source/lib/src/blocking_queue.h`.
pub struct HandoffQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
}

struct QueueState<T> {
    items: VecDeque<T>,
    valid: bool,
}

impl<T> HandoffQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                valid: true,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Push an item and wake one waiter. No-op once invalidated.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock().unwrap();
        if !state.valid {
            return;
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Block until an item is available or the queue is invalidated.
    /// Returns `None` once invalidated and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if !state.valid {
                return None;
            }
            state = self.not_empty.wait(state).unwrap();
        }
    }

    /// Block up to `timeout` for an item; `Ok(None)` on timeout,
    /// `Err(())` once invalidated and drained.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, ()> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(Some(item));
            }
            if !state.valid {
                return Err(());
            }
            let (guard, result) = self.not_empty.wait_timeout(state, timeout).unwrap();
            state = guard;
            if result.timed_out() {
                return Ok(None);
            }
        }
    }

    /// Wake every waiter; can be called repeatedly. Once invalidated, the
    /// queue stays invalid forever.
    pub fn invalidate(&self) {
        let mut state = self.state.lock().unwrap();
        state.valid = false;
        self.not_empty.notify_all();
    }
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

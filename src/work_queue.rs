// src/work_queue.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sub-task bookkeeping for filling a batch block.
//!
//! Ported from `original_source/lib/src/worker.h`'s `ReadBatchBlockTask`
//! and `SubTask`. Filling one block is split into `num_sub_tasks`
//! independent read jobs (one per worker thread); the last one to finish
//! resets the block's read cursor and publishes the block index on the
//! ready queue.

use crate::batch_block::HandoffQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Only one kind of sub-task exists today; kept as an enum so new work
/// kinds (e.g. a future prefetch-ahead task) slot in without reshaping
/// the queue.
pub enum SubTask {
    ReadBatchBlock(Arc<ReadBatchBlockSubTask>),
}

/// Per-block completion tracker, shared by every sub-task filling that
/// block.
pub struct ReadBatchBlockTask {
    pub block_index: usize,
    pub num_sub_tasks: usize,
    num_done: AtomicUsize,
    ready_blocks: Arc<HandoffQueue<usize>>,
}

impl ReadBatchBlockTask {
    pub fn new(
        block_index: usize,
        num_sub_tasks: usize,
        ready_blocks: Arc<HandoffQueue<usize>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            block_index,
            num_sub_tasks,
            num_done: AtomicUsize::new(0),
            ready_blocks,
        })
    }

    /// Called by a worker once it has finished its share of the block.
    /// The sub-task that observes the count reach `num_sub_tasks`
    /// publishes the block.
    pub fn mark_sub_task_done(&self) {
        let done = self.num_done.fetch_add(1, Ordering::AcqRel) + 1;
        if done == self.num_sub_tasks {
            self.ready_blocks.push(self.block_index);
        }
    }
}

/// One worker's share of filling a block.
pub struct ReadBatchBlockSubTask {
    pub parent: Arc<ReadBatchBlockTask>,
    pub worker_index: usize,
}

impl ReadBatchBlockSubTask {
    pub fn new(parent: Arc<ReadBatchBlockTask>, worker_index: usize) -> Self {
        Self { parent, worker_index }
    }
}

/// Dispatch queue shared by all worker threads. Uses the same blocking,
/// repeatably-invalidatable queue as the block handoff, since the
/// original parametrizes a single `BlockingQueue<T>` template over both
/// uses.
pub type WorkQueue = HandoffQueue<SubTask>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_sub_task_publishes_the_block() {
        let ready: Arc<HandoffQueue<usize>> = Arc::new(HandoffQueue::new());
        let task = ReadBatchBlockTask::new(0, 3, ready.clone());

        task.mark_sub_task_done();
        task.mark_sub_task_done();
        // not yet published after 2 of 3
        let result = ready.pop_timeout(std::time::Duration::from_millis(10));
        assert!(matches!(result, Ok(None)));

        task.mark_sub_task_done();
        assert_eq!(ready.pop(), Some(0));
    }

    #[test]
    fn work_queue_dispatches_sub_tasks() {
        let ready: Arc<HandoffQueue<usize>> = Arc::new(HandoffQueue::new());
        let parent = ReadBatchBlockTask::new(1, 1, ready.clone());
        let queue: WorkQueue = HandoffQueue::new();
        let sub_task = Arc::new(ReadBatchBlockSubTask::new(parent, 0));
        queue.push(SubTask::ReadBatchBlock(sub_task));

        match queue.pop() {
            Some(SubTask::ReadBatchBlock(sub_task)) => {
                sub_task.parent.mark_sub_task_done();
            }
            None => panic!("expected a sub-task"),
        }
        assert_eq!(ready.pop(), Some(1));
    }
}

// src/sampler.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coordinator that owns the open file, the worker pool, and the two
//! batch blocks, and exposes [`Sampler::next_batch`].
//!
//! Ported from `original_source/lib/src/nvme_sampler.h`'s `NvmeSampler`.

use crate::batch_block::{BatchBlock, HandoffQueue};
use crate::buffer_pool::{AllocatorPair, BatchBlockPool};
use crate::calculator::{calculate, SamplerConfig, SamplingParameters, TensorDescription};
use crate::error::{Result, SamplerError};
use crate::work_queue::{ReadBatchBlockSubTask, ReadBatchBlockTask, SubTask, WorkQueue};
use crate::worker::{ScatterTarget, WorkerThread};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Opens `path` with `O_DIRECT` and advises the kernel this file will be
/// read randomly and won't be reused, matching the original's
/// `open(..., O_DIRECT)` + `posix_fadvise(..., POSIX_FADV_RANDOM |
/// POSIX_FADV_NOREUSE)`.
fn open_direct(path: &Path) -> Result<i32> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| SamplerError::BadConfig(format!("invalid file path: {e}")))?;

    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_DIRECT) };
    if fd < 0 {
        return Err(SamplerError::Io(std::io::Error::last_os_error()));
    }

    let advise_rc = unsafe {
        libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_RANDOM | libc::POSIX_FADV_NOREUSE)
    };
    if advise_rc != 0 {
        tracing::warn!(errno = advise_rc, "posix_fadvise failed, continuing anyway");
    }

    Ok(fd)
}

/// Random-access batch sampler over a flat row-major tensor file.
pub struct Sampler {
    fd: i32,
    params: SamplingParameters,
    pool: BatchBlockPool,
    blocks: [std::sync::Mutex<BatchBlock>; 2],
    ready_blocks: Arc<HandoffQueue<usize>>,
    work_queue: Arc<WorkQueue>,
    workers: Vec<JoinHandle<()>>,
    /// `None` until the first `next_batch` call pops a fully-produced
    /// block off `ready_blocks`; mirrors the original's `current_block{NULL}`.
    current_block: Option<usize>,
}

impl Sampler {
    /// Construct a sampler whose output buffer comes from the global
    /// allocator, for callers that don't need a custom `(alloc, free)` pair.
    pub fn new(tensor: &TensorDescription, config: SamplerConfig) -> Result<Self> {
        Self::with_allocator(tensor, config, AllocatorPair::system())
    }

    /// Construct a sampler whose output buffer is obtained through the
    /// caller-supplied `(alloc, free)` pair, invoked exactly once each.
    pub fn with_allocator(
        tensor: &TensorDescription,
        config: SamplerConfig,
        allocator: AllocatorPair,
    ) -> Result<Self> {
        let file_size_b = tensor.file_size_b();
        let params = calculate(file_size_b, tensor.row_size_b, &config)?;

        let fd = open_direct(Path::new(&tensor.file_path))?;

        let block_size_b = params.batch_size_b * params.num_batches_in_block;
        let pool = BatchBlockPool::new(block_size_b, allocator);

        let num_samples_per_block = params.num_batches_in_block * config.max_batch_elements;
        let blocks = [
            std::sync::Mutex::new(BatchBlock::new(tensor.row_size_b, num_samples_per_block, pool.block_ptr(0))),
            std::sync::Mutex::new(BatchBlock::new(tensor.row_size_b, num_samples_per_block, pool.block_ptr(1))),
        ];

        let ready_blocks: Arc<HandoffQueue<usize>> = Arc::new(HandoffQueue::new());
        let work_queue: Arc<WorkQueue> = Arc::new(HandoffQueue::new());

        let targets = [
            ScatterTarget { buffer: pool.block_ptr(0), row_size_b: tensor.row_size_b },
            ScatterTarget { buffer: pool.block_ptr(1), row_size_b: tensor.row_size_b },
        ];

        let num_threads = config.max_num_threads as usize;
        let mut workers = Vec::with_capacity(num_threads);
        for thread_index in 0..num_threads {
            let mut worker = WorkerThread::new(tensor.row_size_b, params, thread_index, config.seed)?;
            let queue = work_queue.clone();
            workers.push(std::thread::spawn(move || {
                worker.run(fd, &queue, &targets);
            }));
        }

        let mut sampler = Self {
            fd,
            params,
            pool,
            blocks,
            ready_blocks,
            work_queue,
            workers,
            current_block: None,
        };
        sampler.schedule_block_fill(0);
        sampler.schedule_block_fill(1);
        Ok(sampler)
    }

    fn schedule_block_fill(&self, block_index: usize) {
        let num_threads = self.workers.len();
        let task = ReadBatchBlockTask::new(block_index, num_threads, self.ready_blocks.clone());
        for worker_index in 0..num_threads {
            let sub_task = Arc::new(ReadBatchBlockSubTask::new(task.clone(), worker_index));
            self.work_queue.push(SubTask::ReadBatchBlock(sub_task));
        }
    }

    /// Block until a fully-produced block is available on the handoff
    /// queue, reset its read cursor, and return its index. Mirrors
    /// `fetch_next_batch_block`: the consumer only ever observes a block
    /// after it has cleared the ready-queue handshake, never while a
    /// worker is still scattering rows into it.
    fn fetch_next_ready_block(&self) -> usize {
        let next_block = self
            .ready_blocks
            .pop()
            .expect("worker pool invalidated while a batch was still pending");
        self.blocks[next_block].lock().unwrap().reset();
        next_block
    }

    /// Return a pointer to the next `rows` fully-sampled rows.
    ///
    /// Mirrors `NvmeSampler::get_next_batch`: the first call (and only
    /// the first call) pops a block off the ready queue before touching
    /// it. A block is served from while `samples_left > rows`; at
    /// `samples_left <= rows` (including equality) it is resubmitted for
    /// production and the next ready block is drained instead — the
    /// original's strict `>` continue-using-this-block check, not a `>=`.
    pub fn next_batch(&mut self, rows: i64) -> *const u8 {
        debug_assert!(rows > 0, "next_batch requires rows > 0, got {rows}");

        loop {
            if self.current_block.is_none() {
                self.current_block = Some(self.fetch_next_ready_block());
            }
            let idx = self.current_block.expect("just set above");
            let mut block = self.blocks[idx].lock().unwrap();

            if block.samples_left() > rows {
                return block.take(rows);
            }

            debug_assert!(
                rows < block.num_samples,
                "requested batch of {rows} rows exceeds a block's capacity of {}",
                block.num_samples
            );
            drop(block);

            self.schedule_block_fill(idx);
            self.current_block = None;
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.work_queue.invalidate();
        self.ready_blocks.invalidate();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn init_tracing() {
        use tracing_subscriber::{fmt, EnvFilter};
        let _ = fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
    }

    fn write_fixture(num_rows: i64, row_size_b: i64) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut row = vec![0u8; row_size_b as usize];
        for i in 0..num_rows {
            row.fill((i % 256) as u8);
            file.write_all(&row).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn open_direct_rejects_missing_file() {
        init_tracing();
        let result = open_direct(Path::new("/nonexistent/path/for/nvme-sampler-tests"));
        assert!(result.is_err());
    }

    #[test]
    fn construction_fails_on_infeasible_plan() {
        init_tracing();
        let fixture = write_fixture(1024, 4096);
        let tensor = TensorDescription::new(1024, 4096, fixture.path().to_str().unwrap());
        // memory_usage_limit_b far too small to afford even 4 batches in a block.
        let config = SamplerConfig::new(1, 1, 4096, 0);
        let result = Sampler::new(&tensor, config);
        assert!(result.is_err());
    }

    /// `O_DIRECT` is rejected outright by some filesystems (tmpfs, where
    /// `$TMPDIR` often lives in CI, returns `EINVAL` at `open()`). Probe
    /// before running a test that needs a real direct-I/O-capable path,
    /// rather than asserting on behavior the backing store can't support.
    fn direct_io_supported(path: &Path) -> bool {
        match open_direct(path) {
            Ok(fd) => {
                unsafe { libc::close(fd) };
                true
            }
            Err(_) => false,
        }
    }

    /// A single-threaded sampler over a 4 KiB-row, 1024-row file must
    /// return only rows whose bytes match a row actually present in the
    /// file.
    #[test]
    fn end_to_end_single_threaded_rows_match_file_contents() {
        init_tracing();
        let num_rows = 1024;
        let row_size_b = 4096;
        let fixture = write_fixture(num_rows, row_size_b);
        if !direct_io_supported(fixture.path()) {
            eprintln!("skipping: O_DIRECT unsupported on this filesystem");
            return;
        }

        let tensor = TensorDescription::new(num_rows, row_size_b, fixture.path().to_str().unwrap());
        let config = SamplerConfig::new(32, 1, 16 * 1024 * 1024, 7);
        let mut sampler = Sampler::new(&tensor, config).expect("sampler construction");

        for _ in 0..64 {
            let ptr = sampler.next_batch(32);
            let bytes = unsafe { std::slice::from_raw_parts(ptr, (32 * row_size_b) as usize) };
            for row in bytes.chunks(row_size_b as usize) {
                let expected = row[0];
                assert!(
                    row.iter().all(|&b| b == expected),
                    "row bytes are not a single file row (value {expected})"
                );
            }
        }
    }

    /// Destroying a sampler after sampling must join every worker and
    /// release the output buffer through the caller's allocator exactly
    /// once, with no leak.
    #[test]
    fn destroy_after_sampling_frees_buffer_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        init_tracing();
        let num_rows = 1024;
        let row_size_b = 4096;
        let fixture = write_fixture(num_rows, row_size_b);
        if !direct_io_supported(fixture.path()) {
            eprintln!("skipping: O_DIRECT unsupported on this filesystem");
            return;
        }

        let alloc_calls = Arc::new(AtomicUsize::new(0));
        let free_calls = Arc::new(AtomicUsize::new(0));
        let a = alloc_calls.clone();
        let f = free_calls.clone();
        let allocator = AllocatorPair::new(
            move |size| {
                a.fetch_add(1, Ordering::SeqCst);
                unsafe {
                    let layout = std::alloc::Layout::from_size_align(size, crate::constants::PAGE_SIZE as usize).unwrap();
                    std::alloc::alloc(layout)
                }
            },
            move |ptr, size| {
                f.fetch_add(1, Ordering::SeqCst);
                unsafe {
                    let layout = std::alloc::Layout::from_size_align(size, crate::constants::PAGE_SIZE as usize).unwrap();
                    std::alloc::dealloc(ptr, layout);
                }
            },
        );

        let tensor = TensorDescription::new(num_rows, row_size_b, fixture.path().to_str().unwrap());
        let config = SamplerConfig::new(32, 1, 16 * 1024 * 1024, 7);
        {
            let mut sampler =
                Sampler::with_allocator(&tensor, config, allocator).expect("sampler construction");
            let _ = sampler.next_batch(32);
            assert_eq!(alloc_calls.load(Ordering::SeqCst), 1);
            assert_eq!(free_calls.load(Ordering::SeqCst), 0);
        }
        assert_eq!(free_calls.load(Ordering::SeqCst), 1);
    }

    /// `max_num_threads = 1` and a fixed seed yield byte-identical block
    /// contents across two independent constructions over the same file.
    #[test]
    fn single_threaded_fixed_seed_is_deterministic() {
        init_tracing();
        let num_rows = 1024;
        let row_size_b = 4096;
        let fixture = write_fixture(num_rows, row_size_b);
        if !direct_io_supported(fixture.path()) {
            eprintln!("skipping: O_DIRECT unsupported on this filesystem");
            return;
        }

        let path = fixture.path().to_str().unwrap();
        let tensor_a = TensorDescription::new(num_rows, row_size_b, path);
        let tensor_b = TensorDescription::new(num_rows, row_size_b, path);
        let config_a = SamplerConfig::new(32, 1, 16 * 1024 * 1024, 7);
        let config_b = SamplerConfig::new(32, 1, 16 * 1024 * 1024, 7);

        let mut sampler_a = Sampler::new(&tensor_a, config_a).expect("sampler a construction");
        let mut sampler_b = Sampler::new(&tensor_b, config_b).expect("sampler b construction");

        for _ in 0..8 {
            let ptr_a = sampler_a.next_batch(32);
            let ptr_b = sampler_b.next_batch(32);
            let bytes_a = unsafe { std::slice::from_raw_parts(ptr_a, (32 * row_size_b) as usize) };
            let bytes_b = unsafe { std::slice::from_raw_parts(ptr_b, (32 * row_size_b) as usize) };
            assert_eq!(bytes_a, bytes_b, "identical seed/thread-count runs diverged");
        }
    }
}

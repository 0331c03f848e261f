//! Worker Pool
//!
//! A core-limited thread pool shared by every stage. Work is submitted
//! per-observation, per-LOD, or per-leaf; individual item failures are
//! logged and counted without aborting peers.
//!
//! The iteration direction flips on each invocation of [`WorkPool::
//! run_flipped`]: repeatedly iterating the same collection forward leaves
//! the same workers warming the same leading items, so alternating the
//! direction balances worker start times. The toggle is explicit state on
//! the pool, not a global.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::errors::{RegolithError, Result};

/// Core-limited pool with direction-flipped iteration.
#[derive(Debug)]
pub struct WorkPool {
    pool: rayon::ThreadPool,
    reverse_next: AtomicBool,
}

impl WorkPool {
    /// Build a pool with `max_threads` workers (0 = available cores).
    pub fn new(max_threads: usize) -> Result<Self> {
        let threads = if max_threads > 0 {
            max_threads
        } else {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("texworker-{i}"))
            .build()
            .map_err(|e| RegolithError::Pool(e.to_string()))?;
        Ok(Self {
            pool,
            reverse_next: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the pool so nested rayon iterators are capped to
    /// this pool's workers.
    pub fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        self.pool.install(op)
    }

    /// Run `work` over every item in parallel, flipping the iteration
    /// direction relative to the previous invocation.
    ///
    /// Item failures are logged under `label` and counted; the pass always
    /// visits every item. Returns the failure count.
    pub fn run_flipped<T, F>(&self, label: &str, items: &[T], work: F) -> usize
    where
        T: Sync,
        F: Fn(usize, &T) -> Result<()> + Send + Sync,
    {
        let mut order: Vec<usize> = (0..items.len()).collect();
        if self.reverse_next.fetch_xor(true, Ordering::Relaxed) {
            order.reverse();
        }
        let failures = Mutex::new(0usize);
        self.pool.install(|| {
            order.par_iter().for_each(|&i| {
                if let Err(err) = work(i, &items[i]) {
                    log::warn!("{label}: item {i} failed: {err}");
                    *failures.lock() += 1;
                }
            });
        });
        let count = *failures.lock();
        if count > 0 {
            log::warn!("{label}: {count}/{} items failed", items.len());
        }
        count
    }
}

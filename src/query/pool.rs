// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded worker pool and per-query cancellation.

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::errors::Result;

/// Cooperative cancellation flag owned by one query.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<R> {
    Done(R),
    /// Skipped because the query was cancelled before the task started.
    Cancelled,
    /// Skipped because the query deadline had passed.
    TimedOut,
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("audiomatch-query-{idx}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Run `task` over `items` on the pool, results in input order.
    ///
    /// Cancellation and the deadline are checked as each task starts; tasks
    /// already running are allowed to finish.
    pub fn run_ordered<T, R, F>(
        &self,
        items: &[T],
        cancel: &CancelToken,
        deadline: Option<Instant>,
        task: F,
    ) -> Vec<TaskOutcome<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    if cancel.is_cancelled() {
                        return TaskOutcome::Cancelled;
                    }
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return TaskOutcome::TimedOut;
                    }
                    TaskOutcome::Done(task(item))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn results_keep_input_order() {
        let pool = WorkerPool::new(4).expect("pool");
        let items: Vec<u64> = (0..64).collect();
        let out = pool.run_ordered(&items, &CancelToken::new(), None, |n| {
            // later items finish first
            std::thread::sleep(Duration::from_micros(64 - n));
            n * 2
        });
        let values: Vec<u64> = out
            .into_iter()
            .map(|o| match o {
                TaskOutcome::Done(v) => v,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(values, (0..64).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn cancelled_token_skips_tasks() {
        let pool = WorkerPool::new(2).expect("pool");
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = pool.run_ordered(&[1, 2, 3], &cancel, None, |n| *n);
        assert!(out.iter().all(|o| *o == TaskOutcome::Cancelled));
    }

    #[test]
    fn past_deadline_times_out() {
        let pool = WorkerPool::new(2).expect("pool");
        let deadline = Instant::now();
        std::thread::sleep(Duration::from_millis(2));
        let out = pool.run_ordered(&[1, 2], &CancelToken::new(), Some(deadline), |n| *n);
        assert!(out.iter().all(|o| *o == TaskOutcome::TimedOut));
    }

    #[test]
    fn tokens_are_independent() {
        let a = CancelToken::new();
        let b = CancelToken::new();
        a.cancel();
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        let shared = a.clone();
        assert!(shared.is_cancelled());
    }
}

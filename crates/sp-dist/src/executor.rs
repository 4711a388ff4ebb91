use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::{DistConfig, DistError};

/// Runs independent per-partition tasks and collects their results in
/// input order. Tasks must be pure: the result may not depend on which
/// thread ran a task or in what order tasks finished.
pub trait Executor: Send + Sync {
    fn map<T, R, F>(&self, inputs: &[T], task: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync + Send;
}

/// In-process executor that runs every task on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncExecutor;

impl Executor for SyncExecutor {
    fn map<T, R, F>(&self, inputs: &[T], task: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync + Send,
    {
        inputs
            .iter()
            .enumerate()
            .map(|(i, input)| task(i, input))
            .collect()
    }
}

/// Executor backed by a dedicated rayon pool.
#[derive(Debug)]
pub struct ThreadPoolExecutor {
    pool: ThreadPool,
}

impl ThreadPoolExecutor {
    /// `num_threads == 0` lets rayon pick the thread count.
    pub fn new(num_threads: usize) -> Result<Self, DistError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("sp-dist-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    pub fn from_config(config: &DistConfig) -> Result<Self, DistError> {
        Self::new(config.num_threads)
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl Executor for ThreadPoolExecutor {
    fn map<T, R, F>(&self, inputs: &[T], task: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync + Send,
    {
        self.pool.install(|| {
            inputs
                .par_iter()
                .enumerate()
                .map(|(i, input)| task(i, input))
                .collect()
        })
    }
}

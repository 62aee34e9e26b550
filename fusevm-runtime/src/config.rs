//! Engine configuration

use crate::error::{Result, RuntimeError};
use fusevm_spec::BLOCK_SIZE;
use serde::{Deserialize, Serialize};

/// Hard cap on worker threads
pub const MAX_THREADS: usize = 256;

/// Environment variable selecting the worker thread count
pub const ENV_NUM_THREADS: &str = "FUSEVM_NUM_THREADS";

/// Environment variable lowering the thread cap
pub const ENV_MAX_THREADS: &str = "FUSEVM_MAX_THREADS";

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads used for large element-wise evaluations
    pub num_threads: usize,

    /// Elements per interpreter block
    pub block_size: usize,

    /// Check every register operand against the register count before
    /// executing an instruction. Accesses stay bounds-checked when this is
    /// off; the fault is then reported when the operand is first touched.
    pub bounds_check: bool,

    /// Reductions over an axis shorter than this loop over the axis on the
    /// outside and over independent groups on the inside
    pub reduction_threshold: usize,

    /// Iteration spaces smaller than this many elements run serially.
    /// Defaults to two blocks and follows [`EngineConfig::with_block_size`].
    pub parallel_threshold: usize,

    /// Target number of tasks handed to each thread
    pub tasks_per_thread: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_threads: default_threads(),
            block_size: BLOCK_SIZE,
            bounds_check: true,
            reduction_threshold: 64,
            parallel_threshold: parallel_threshold_for(BLOCK_SIZE),
            tasks_per_thread: 16,
        }
    }
}

impl EngineConfig {
    /// Configuration for single-threaded evaluation
    pub fn serial() -> Self {
        Self {
            num_threads: 1,
            ..Self::default()
        }
    }

    /// Default configuration adjusted by `FUSEVM_NUM_THREADS` and
    /// `FUSEVM_MAX_THREADS`. Unparseable values are ignored.
    pub fn from_env() -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .filter(|&n| n > 0)
        };

        let cap = read(ENV_MAX_THREADS)
            .map_or(MAX_THREADS, |n| n.min(MAX_THREADS));
        let threads = read(ENV_NUM_THREADS).unwrap_or_else(default_threads);

        Self {
            num_threads: threads.min(cap),
            ..Self::default()
        }
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Set the block size. The parallel threshold is reset to two blocks;
    /// use [`EngineConfig::with_parallel_threshold`] afterwards to override it.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self.parallel_threshold = parallel_threshold_for(block_size);
        self
    }

    pub fn with_parallel_threshold(mut self, parallel_threshold: usize) -> Self {
        self.parallel_threshold = parallel_threshold;
        self
    }

    pub fn with_bounds_check(mut self, bounds_check: bool) -> Self {
        self.bounds_check = bounds_check;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_threads == 0 || self.num_threads > MAX_THREADS {
            return Err(RuntimeError::Other(format!(
                "num_threads must be in 1..={}, got {}",
                MAX_THREADS, self.num_threads
            )));
        }
        if self.block_size == 0 {
            return Err(RuntimeError::Other("block_size must be positive".to_string()));
        }
        if self.tasks_per_thread == 0 {
            return Err(RuntimeError::Other(
                "tasks_per_thread must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parallel_threshold_for(block_size: usize) -> usize {
    block_size.saturating_mul(2)
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map_or(1, |n| n.get())
        .min(MAX_THREADS)
}

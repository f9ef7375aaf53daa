//! Engine configuration.
//!
//! All tunables of the engine live in one immutable record that is passed
//! around as an `Arc<EngineConfig>`. Defaults match the behaviour of the
//! production deployment; tests override individual fields.

use std::time::Duration;

/// Tunables for index construction and query execution.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Use the binary-search transitive-path implementation instead of the
    /// hash-map BFS.
    pub use_bin_search_transitive_path: bool,

    /// Worker threads for parallel preprocessing pipelines.
    /// 0 means "hardware concurrency".
    pub worker_count: u32,

    /// Triples per permutation block.
    pub block_size: u32,

    /// Strings longer than this many bytes are externalised by the
    /// vocabulary writer.
    pub externalization_threshold: u32,

    /// Capacity of the bounded work queues in build pipelines.
    pub queue_capacity: u32,

    /// How often streaming operators check the cancellation handle.
    pub cancellation_poll_interval: Duration,

    /// Size estimate for a transitive path with a fixed side. Deliberately
    /// an overestimate so plans merge the fixed side early.
    pub transitive_fixed_side_estimate: u64,

    /// Worst-case blow-up factor of a full transitive hull relative to the
    /// size of its relation (observed on large public knowledge graphs).
    pub transitive_var_blowup_factor: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            use_bin_search_transitive_path: true,
            worker_count: 0,
            block_size: 2048,
            externalization_threshold: 128,
            queue_capacity: 1000,
            cancellation_poll_interval: Duration::from_millis(100),
            transitive_fixed_side_estimate: 1000,
            transitive_var_blowup_factor: 10000,
        }
    }
}

impl EngineConfig {
    /// Resolve `worker_count == 0` to the hardware concurrency.
    pub fn effective_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count as usize
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

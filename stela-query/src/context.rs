//! Execution context threaded through operator evaluation.

use stela_core::{CancellationHandle, DeltaTriples, EngineConfig, MemoryBudget};
use stela_index::Index;
use std::sync::Arc;

/// Everything an operator needs at `compute` time.
///
/// The delta snapshot is taken when the context is created (query start), so
/// a running query never observes concurrent updates.
#[derive(Clone)]
pub struct ExecutionContext {
    pub index: Arc<Index>,
    pub config: Arc<EngineConfig>,
    pub budget: MemoryBudget,
    pub cancellation: CancellationHandle,
    pub delta: Arc<DeltaTriples>,
}

impl ExecutionContext {
    /// Create a context for one query, snapshotting the delta overlay.
    pub fn new(index: Arc<Index>, budget: MemoryBudget) -> Self {
        let config = Arc::clone(index.config());
        let delta = index.delta().snapshot();
        Self {
            index,
            config,
            budget,
            cancellation: CancellationHandle::new(),
            delta,
        }
    }

    /// Same context with a caller-provided cancellation handle.
    pub fn with_cancellation(mut self, cancellation: CancellationHandle) -> Self {
        self.cancellation = cancellation;
        self
    }
}

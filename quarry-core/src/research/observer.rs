//! Progress callbacks for a research run.

use super::query::{SubQuery, Termination};

/// Callback trait for progressive research updates.
///
/// Calls arrive from worker tasks, so implementations must be cheap and must
/// not block.
pub trait ResearchObserver: Send + Sync {
    /// Called before a level's batch is dispatched.
    fn on_level_start(&self, _level: usize, _sub_queries: usize) {}

    /// Called when a sub-query's results have been recorded.
    fn on_sub_query_complete(&self, _sub_query: &SubQuery, _chunks: usize, _new_learnings: usize) {
    }

    /// Called at the level barrier.
    fn on_level_complete(&self, _level: usize, _new_learnings: usize) {}

    /// Called once when the run stops normally.
    fn on_finish(&self, _termination: Termination) {}
}

/// No-op observer.
pub struct NoOpObserver;

impl ResearchObserver for NoOpObserver {}

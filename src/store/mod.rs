//! Remote per-user metrics records.

mod memory;
mod sqlite;

pub use memory::MemoryMetricsStore;
pub use sqlite::SqliteMetricsStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::{auth::UserId, metrics::StudyMetrics};

/// Update function of a transaction. It may run more than once if the store
/// retries; returning `None` aborts without writing.
pub type UpdateFn =
    Box<dyn FnMut(Option<&StudyMetrics>) -> Option<StudyMetrics> + Send + 'static>;

pub fn metrics_path(user: &UserId) -> String {
    format!("users/{user}/metrics")
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn read(&self, user: &UserId) -> Result<Option<StudyMetrics>>;

    /// Atomically reads the record, applies `update`, and writes the result.
    ///
    /// Returns the committed value, or `None` when `update` aborted.
    async fn transact(&self, user: &UserId, update: UpdateFn) -> Result<Option<StudyMetrics>>;
}

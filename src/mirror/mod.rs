//! Local write-ahead copy of unflushed timer seconds.

mod file;
mod memory;

pub use file::FileMirror;
pub use memory::MemoryMirror;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::UserId;

pub fn mirror_key(user: &UserId) -> String {
    format!("ssh_timer_{user}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEntry {
    pub pending: u64,
    /// Epoch milliseconds of the write.
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub committed: u64,
}

impl PendingEntry {
    /// An entry is trusted only once its writer has gone quiet for longer
    /// than `threshold_ms`; a live instance rewrites it every tick.
    pub fn is_stale(&self, now_ms: i64, threshold_ms: i64) -> bool {
        now_ms.saturating_sub(self.updated_at) > threshold_ms
    }
}

pub trait PendingMirror: Send + Sync {
    fn load(&self, user: &UserId) -> Result<Option<PendingEntry>>;
    fn save(&self, user: &UserId, entry: &PendingEntry) -> Result<()>;
    fn clear(&self, user: &UserId) -> Result<()>;
}

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use anyhow::Result;

use super::{mirror_key, PendingEntry, PendingMirror};
use crate::auth::UserId;

/// Process-local mirror for embedding and tests.
#[derive(Default)]
pub struct MemoryMirror {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingMirror for MemoryMirror {
    fn load(&self, user: &UserId) -> Result<Option<PendingEntry>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(&mirror_key(user)).copied())
    }

    fn save(&self, user: &UserId, entry: &PendingEntry) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(mirror_key(user), *entry);
        Ok(())
    }

    fn clear(&self, user: &UserId) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(&mirror_key(user));
        Ok(())
    }
}

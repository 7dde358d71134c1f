use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use anyhow::Result;
use async_trait::async_trait;

use super::{metrics_path, MetricsStore, UpdateFn};
use crate::{auth::UserId, metrics::StudyMetrics};

/// Process-local store; a single lock makes every transaction atomic.
#[derive(Default)]
pub struct MemoryMetricsStore {
    documents: Mutex<HashMap<String, StudyMetrics>>,
}

impl MemoryMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsStore for MemoryMetricsStore {
    async fn read(&self, user: &UserId) -> Result<Option<StudyMetrics>> {
        let documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(&metrics_path(user)).cloned())
    }

    async fn transact(
        &self,
        user: &UserId,
        mut update: UpdateFn,
    ) -> Result<Option<StudyMetrics>> {
        let path = metrics_path(user);
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let next = update(documents.get(&path));
        if let Some(next) = &next {
            documents.insert(path, next.clone());
        }
        Ok(next)
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::{
    auth::UserId,
    metrics::StudyMetrics,
    store::{MetricsStore, UpdateFn},
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaySeconds {
    pub date: NaiveDate,
    pub seconds: u64,
}

/// Record-level operations on a user's metrics outside the timer.
#[derive(Clone)]
pub struct MetricsService {
    store: Arc<dyn MetricsStore>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn MetricsStore>) -> Self {
        Self { store }
    }

    pub async fn metrics(&self, user: &UserId) -> Result<Option<StudyMetrics>> {
        self.store
            .read(user)
            .await
            .with_context(|| format!("failed to read metrics for {user}"))
    }

    /// Bumps `notesCreated`, creating the record if needed. Returns the new count.
    pub async fn record_note_created(&self, user: &UserId) -> Result<u64> {
        let update: UpdateFn = Box::new(|current: Option<&StudyMetrics>| {
            let mut next = current.cloned().unwrap_or_default();
            next.notes_created = next.notes_created.saturating_add(1);
            Some(next)
        });

        let written = self
            .store
            .transact(user, update)
            .await
            .with_context(|| format!("failed to record note for {user}"))?;
        Ok(written.map(|m| m.notes_created).unwrap_or(0))
    }

    /// Seconds studied on each of the `days` days ending at `today`, oldest
    /// first, with missing days as zero.
    pub async fn recent_days(
        &self,
        user: &UserId,
        today: NaiveDate,
        days: u32,
    ) -> Result<Vec<DaySeconds>> {
        let metrics = self.metrics(user).await?.unwrap_or_default();
        Ok((0..i64::from(days))
            .rev()
            .map(|offset| {
                let date = today - Duration::days(offset);
                DaySeconds {
                    date,
                    seconds: metrics.daily_seconds(date),
                }
            })
            .collect())
    }
}

//! Idempotent application of timer flushes.
//!
//! A timer session never sends "add N seconds". It sends the cumulative total
//! it has accumulated so far, and the record remembers how much of each
//! session's total it has already absorbed. Replaying a flush, or two flush
//! paths covering the same window, adds nothing twice.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::merge::merge_metrics;
use super::types::{ContributionMark, StudyMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub session_id: Uuid,
    /// Total seconds this session has accumulated, flushed or not.
    pub through_seconds: u64,
}

impl Contribution {
    pub fn new(session_id: Uuid, through_seconds: u64) -> Self {
        Self {
            session_id,
            through_seconds,
        }
    }
}

/// Seconds of `session_id` already merged into `metrics`.
pub fn applied_seconds(metrics: Option<&StudyMetrics>, session_id: Uuid) -> u64 {
    metrics
        .and_then(|m| m.contributions.get(&session_id.to_string()))
        .map(|mark| mark.seconds)
        .unwrap_or(0)
}

/// Merges the unapplied part of `contribution` and advances the ledger.
///
/// Returns the next snapshot and the number of seconds actually added.
/// A contribution with nothing new leaves every aggregate, `lastUpdated`
/// included, as it was. Ledger entries idle for longer than `retention` are
/// dropped.
pub fn apply_contribution<Tz>(
    previous: Option<&StudyMetrics>,
    contribution: &Contribution,
    at: &DateTime<Tz>,
    retention: Duration,
) -> (StudyMetrics, u64)
where
    Tz: TimeZone,
{
    let applied = applied_seconds(previous, contribution.session_id);
    let delta = contribution.through_seconds.saturating_sub(applied);
    let mut next = if delta == 0 {
        previous.cloned().unwrap_or_default()
    } else {
        merge_metrics(previous, i64::try_from(delta).unwrap_or(i64::MAX), at)
    };

    let at_utc = at.with_timezone(&Utc);
    next.contributions.insert(
        contribution.session_id.to_string(),
        ContributionMark {
            seconds: applied.max(contribution.through_seconds),
            updated_at: at_utc,
        },
    );
    next.contributions
        .retain(|_, mark| at_utc.signed_duration_since(mark.updated_at) <= retention);

    (next, delta)
}

mod ledger;
mod merge;
mod types;

pub use ledger::{applied_seconds, apply_contribution, Contribution};
pub use merge::{merge_metrics, round_hours, same_week, week_start, STREAK_THRESHOLD_SECS};
pub use types::{ContributionMark, DailyTotal, StudyMetrics, DATE_FORMAT};

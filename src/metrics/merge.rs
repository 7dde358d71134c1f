use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

use super::types::{StudyMetrics, DATE_FORMAT};

/// Seconds studied in a day before that day counts toward the streak.
pub const STREAK_THRESHOLD_SECS: u64 = 3600;

const HOUR_PRECISION: f64 = 10_000.0;

/// Rounds an hour value to 4 decimal places.
pub fn round_hours(value: f64) -> f64 {
    (value * HOUR_PRECISION).round() / HOUR_PRECISION
}

/// Monday of the week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

pub fn same_week(a: NaiveDate, b: NaiveDate) -> bool {
    week_start(a) == week_start(b)
}

/// Computes the next metrics snapshot after `added_seconds` of study ending
/// at `at`.
///
/// Calendar days and weeks are evaluated in `at`'s timezone. A previous
/// `lastUpdated` is converted into that timezone before the week comparison.
/// Non-positive amounts only bump `lastUpdated`.
pub fn merge_metrics<Tz>(
    previous: Option<&StudyMetrics>,
    added_seconds: i64,
    at: &DateTime<Tz>,
) -> StudyMetrics
where
    Tz: TimeZone,
{
    let mut next = previous.cloned().unwrap_or_default();
    let at_utc = at.with_timezone(&Utc);

    if added_seconds <= 0 {
        next.last_updated = Some(at_utc);
        return next;
    }

    let added = added_seconds.unsigned_abs();
    let add_hours = added as f64 / 3600.0;
    let tz = at.timezone();
    let today = at.date_naive();

    let week_base = match previous.and_then(|prev| prev.last_updated) {
        Some(last) if same_week(last.with_timezone(&tz).date_naive(), today) => {
            next.this_week_hours
        }
        _ => 0.0,
    };
    next.this_week_hours = round_hours(week_base + add_hours);
    next.total_study_hours = round_hours(next.total_study_hours + add_hours);

    let day_base = if next.today_date == Some(today) {
        next.today_seconds
    } else {
        0
    };
    next.today_date = Some(today);
    next.today_seconds = day_base.saturating_add(added);

    if next.today_seconds >= STREAK_THRESHOLD_SECS
        && next.streak_last_qualified_date != Some(today)
    {
        let yesterday = today.pred_opt();
        next.study_streak = if yesterday.is_some() && next.streak_last_qualified_date == yesterday
        {
            next.study_streak.saturating_add(1)
        } else {
            1
        };
        next.streak_last_qualified_date = Some(today);
    }

    let day = next
        .daily
        .entry(today.format(DATE_FORMAT).to_string())
        .or_default();
    day.seconds = day.seconds.saturating_add(added);

    next.last_updated = Some(at_utc);
    next
}

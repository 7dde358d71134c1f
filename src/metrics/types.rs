use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Per-user study aggregate stored at `users/{uid}/metrics`.
///
/// Documents written by older clients may lack fields or carry loosely typed
/// numbers; everything missing reads as its default. Keys this type does not
/// know about are kept in `extra` and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StudyMetrics {
    #[serde(deserialize_with = "lenient_f64")]
    pub total_study_hours: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub this_week_hours: f64,
    #[serde(deserialize_with = "lenient_count")]
    pub notes_created: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub study_streak: u64,
    #[serde(
        deserialize_with = "lenient_datetime",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub today_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_count")]
    pub today_seconds: u64,
    #[serde(
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub streak_last_qualified_date: Option<NaiveDate>,
    pub daily: BTreeMap<String, DailyTotal>,
    /// Cumulative seconds applied per timer session; see `ledger`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub contributions: BTreeMap<String, ContributionMark>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StudyMetrics {
    pub fn today_hours(&self) -> f64 {
        self.today_seconds as f64 / 3600.0
    }

    pub fn daily_seconds(&self, date: NaiveDate) -> u64 {
        self.daily
            .get(&date.format(DATE_FORMAT).to_string())
            .map(|total| total.seconds)
            .unwrap_or(0)
    }
}

/// One entry of the `daily` series. Always written as `{seconds}`.
///
/// Older clients stored a bare number of hours, or an object carrying
/// `seconds` and/or `hours`, sometimes as numeric strings. Anything else
/// reads as zero rather than failing the whole document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DailyTotal {
    pub seconds: u64,
}

impl<'de> Deserialize<'de> for DailyTotal {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(deserializer)?;
        let seconds = match &value {
            Some(Value::Object(fields)) => fields
                .get("seconds")
                .and_then(loose_number)
                .or_else(|| fields.get("hours").and_then(loose_number).map(|h| h * 3600.0)),
            Some(other) => loose_number(other).map(|hours| hours * 3600.0),
            None => None,
        };
        Ok(Self {
            seconds: seconds.map(clamp_count).unwrap_or(0),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionMark {
    pub seconds: u64,
    pub updated_at: DateTime<Utc>,
}

fn clamp_count(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

/// A finite number, or a string holding one.
fn loose_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(loose_number).unwrap_or(0.0))
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(loose_number)
        .map(clamp_count)
        .unwrap_or(0))
}

fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer).unwrap_or(None);
    Ok(value.and_then(|raw| NaiveDate::parse_from_str(&raw, DATE_FORMAT).ok()))
}

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer).unwrap_or(None);
    Ok(value.and_then(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }))
}

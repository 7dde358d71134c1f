use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
    time::Duration,
};

pub const DEBUG_ENV: &str = "STUDYTIMER_DEBUG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    pub tick_interval_ms: u64,
    pub flush_interval_secs: u64,
    /// A mirror entry older than this is considered abandoned by its writer.
    pub stale_after_ms: u64,
    pub guard_poll_ms: u64,
    pub ledger_retention_days: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            flush_interval_secs: 10,
            stale_after_ms: 3_000,
            guard_poll_ms: 25,
            ledger_retention_days: 7,
        }
    }
}

impl TimerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn guard_poll(&self) -> Duration {
        Duration::from_millis(self.guard_poll_ms.max(1))
    }

    pub fn stale_after_ms(&self) -> i64 {
        i64::try_from(self.stale_after_ms).unwrap_or(i64::MAX)
    }

    pub fn ledger_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ledger_retention_days))
    }

    /// Debug mode flushes on every tick instead of on the periodic interval.
    pub fn debug(mut self) -> Self {
        let tick_secs = self.tick_interval_ms.div_ceil(1_000);
        self.flush_interval_secs = tick_secs.max(1);
        self
    }
}

pub fn debug_mode_from_env() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    timer: TimerSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn timer(&self) -> TimerSettings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .timer
            .clone()
    }

    pub fn update_timer(&self, settings: TimerSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        guard.timer = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

use std::time::Duration;

use tracing::warn;

pub const ENV_SERVER_URL: &str = "SCRIPTDECK_SERVER";
pub const ENV_LIST_INTERVAL_MS: &str = "SCRIPTDECK_LIST_INTERVAL_MS";
pub const ENV_DETAIL_INTERVAL_MS: &str = "SCRIPTDECK_DETAIL_INTERVAL_MS";

pub const DEFAULT_LIST_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_DETAIL_INTERVAL_MS: u64 = 1_000;

/// Polling cadence for the sync service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub list_interval_ms: u64,
    pub detail_interval_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            list_interval_ms: DEFAULT_LIST_INTERVAL_MS,
            detail_interval_ms: DEFAULT_DETAIL_INTERVAL_MS,
        }
    }
}

impl SyncConfig {
    /// Defaults, overridden by `SCRIPTDECK_LIST_INTERVAL_MS` and
    /// `SCRIPTDECK_DETAIL_INTERVAL_MS` when set to a positive integer.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            list_interval_ms: env_interval_ms(ENV_LIST_INTERVAL_MS)
                .unwrap_or(defaults.list_interval_ms),
            detail_interval_ms: env_interval_ms(ENV_DETAIL_INTERVAL_MS)
                .unwrap_or(defaults.detail_interval_ms),
        }
    }

    #[must_use]
    pub fn list_interval(&self) -> Duration {
        Duration::from_millis(self.list_interval_ms)
    }

    #[must_use]
    pub fn detail_interval(&self) -> Duration {
        Duration::from_millis(self.detail_interval_ms)
    }
}

/// Server base URL: an explicit value (CLI flag, caller config) wins over
/// `SCRIPTDECK_SERVER`. Returns `None` when neither is set.
#[must_use]
pub fn resolve_server_url(explicit: Option<&str>) -> Option<String> {
    if let Some(value) = explicit {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    env_non_empty(ENV_SERVER_URL)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_interval_ms(key: &str) -> Option<u64> {
    let raw = env_non_empty(key)?;
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Some(ms),
        _ => {
            warn!(%key, value = %raw, "ignoring invalid poll interval override");
            None
        }
    }
}

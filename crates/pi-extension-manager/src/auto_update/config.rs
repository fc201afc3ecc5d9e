use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtMgrError;
use crate::persist::write_atomic;

pub const HOUR_MS: u64 = 60 * 60 * 1000;
pub const DAY_MS: u64 = 24 * HOUR_MS;
pub const WEEK_MS: u64 = 7 * DAY_MS;
/// Months are a flat 30 days.
pub const MONTH_MS: u64 = 30 * DAY_MS;

const OFF_TEXT: &str = "off";

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s*(h|hr|hrs|hour|hours|d|day|days|w|wk|wks|week|weeks|mo|mon|mos|month|months)$")
        .expect("valid duration regex")
});

/// Persisted auto-update settings and the result of the last check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoUpdateConfig {
    pub interval_ms: u64,
    pub enabled: bool,
    pub display_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_check: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates_available: Option<Vec<String>>,
}

impl Default for AutoUpdateConfig {
    fn default() -> Self {
        Self::off()
    }
}

impl AutoUpdateConfig {
    pub fn off() -> Self {
        Self {
            interval_ms: 0,
            enabled: false,
            display_text: OFF_TEXT.to_string(),
            last_check: None,
            next_check: None,
            updates_available: None,
        }
    }

    /// Enabled at `interval_ms`; zero means off.
    pub fn every(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            enabled: true,
            display_text: describe_interval(interval_ms),
            last_check: None,
            next_check: None,
            updates_available: None,
        }
        .sanitize()
    }

    /// Force the off encoding whenever the interval is zero or the config is
    /// disabled, whatever the other fields claim.
    pub fn sanitize(mut self) -> Self {
        if self.interval_ms == 0 || !self.enabled {
            self.interval_ms = 0;
            self.enabled = false;
            self.display_text = OFF_TEXT.to_string();
            self.next_check = None;
        } else if self.display_text.trim().is_empty() {
            self.display_text = describe_interval(self.interval_ms);
        }
        self
    }

    /// Field-by-field read of a persisted blob; wrong-typed fields fall back
    /// to their defaults. The result is sanitized.
    pub fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key);
        let config = Self {
            interval_ms: field("intervalMs").and_then(Value::as_u64).unwrap_or(0),
            enabled: field("enabled").and_then(Value::as_bool).unwrap_or(false),
            display_text: field("displayText")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            last_check: field("lastCheck").and_then(Value::as_i64),
            next_check: field("nextCheck").and_then(Value::as_i64),
            updates_available: field("updatesAvailable")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect()
                }),
        };
        config.sanitize()
    }
}

/// Parse a user-entered interval into milliseconds. `Some(0)` means off;
/// `None` means the input is not understood.
pub fn parse_duration(input: &str) -> Option<u64> {
    let lowered = input.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "never" | "off" | "disable" | "disabled" | "0" => return Some(0),
        "daily" => return Some(DAY_MS),
        "weekly" => return Some(WEEK_MS),
        _ => {}
    }
    let caps = DURATION_RE.captures(&lowered)?;
    let amount = caps.get(1)?.as_str().parse::<u64>().ok()?;
    let unit = match caps.get(2)?.as_str() {
        "h" | "hr" | "hrs" | "hour" | "hours" => HOUR_MS,
        "d" | "day" | "days" => DAY_MS,
        "w" | "wk" | "wks" | "week" | "weeks" => WEEK_MS,
        _ => MONTH_MS,
    };
    amount.checked_mul(unit)
}

/// Human-readable interval, e.g. `daily`, `every 3 days`, `off`.
pub fn describe_interval(interval_ms: u64) -> String {
    if interval_ms == 0 {
        return OFF_TEXT.to_string();
    }
    if interval_ms == DAY_MS {
        return "daily".to_string();
    }
    if interval_ms == WEEK_MS {
        return "weekly".to_string();
    }
    let (amount, unit) = [
        (MONTH_MS, "month"),
        (WEEK_MS, "week"),
        (DAY_MS, "day"),
        (HOUR_MS, "hour"),
    ]
    .iter()
    .find(|(size, _)| interval_ms % size == 0)
    .map(|(size, unit)| (interval_ms / size, *unit))
    .unwrap_or((interval_ms.div_ceil(60_000), "minute"));
    let plural = if amount == 1 { "" } else { "s" };
    format!("every {amount} {unit}{plural}")
}

/// `auto-update.json` under the manager's state directory.
#[derive(Debug, Clone)]
pub struct AutoUpdateStore {
    path: PathBuf,
}

impl AutoUpdateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files yield the off config.
    pub fn load(&self) -> AutoUpdateConfig {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read {}: {e}", self.path.display());
                }
                return AutoUpdateConfig::off();
            }
        };
        match serde_json::from_str::<Value>(&content) {
            Ok(value) => AutoUpdateConfig::from_value(&value),
            Err(e) => {
                tracing::warn!("Ignoring invalid {}: {e}", self.path.display());
                AutoUpdateConfig::off()
            }
        }
    }

    pub fn save(&self, config: &AutoUpdateConfig) -> Result<(), ExtMgrError> {
        let config = config.clone().sanitize();
        let mut content = serde_json::to_string_pretty(&config)?;
        content.push('\n');
        write_atomic(&self.path, content.as_bytes())
    }
}

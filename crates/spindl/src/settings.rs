//! Layered runtime settings.
//!
//! Loading flow:
//! 1. Start with compiled [`SpindlSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `SPINDL_*` environment variable overrides (highest priority)
//!
//! Merge rules: objects merge recursively, arrays and primitives are
//! replaced, `null` values are skipped so a file cannot blank a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use spindl_core::pusher::DEFAULT_APP_KEY;
use spindl_socket::ReconnectPolicy;

/// Error raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file (or the merged document) is not valid.
    #[error("invalid settings: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the binary needs to reach its backend and broker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpindlSettings {
    /// Job-control API connection.
    pub api: ApiSettings,
    /// Broker WebSocket connection.
    pub socket: SocketSettings,
    /// Broker reconnect backoff bounds.
    pub reconnect: ReconnectSettings,
}

/// Job-control API connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiSettings {
    /// Base URL the `spotify/*` operations hang off.
    pub base_url: String,
    /// Bearer token; absent means the anonymous `null` token.
    pub auth_token: Option<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".into(),
            auth_token: None,
        }
    }
}

/// Broker WebSocket connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketSettings {
    /// Broker base URL, without the `/app/<key>` suffix.
    pub url: String,
    /// Application key for the connect path and channel names.
    pub app_key: String,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:6001".into(),
            app_key: DEFAULT_APP_KEY.into(),
        }
    }
}

/// Broker reconnect backoff bounds, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Delay before the first reconnect attempt.
    pub base_delay_ms: u64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

impl ReconnectSettings {
    /// Corresponding socket-layer policy.
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl SpindlSettings {
    /// Clamp values a session cannot run with, rather than failing startup.
    pub fn normalize(&mut self) {
        if self.reconnect.base_delay_ms == 0 {
            warn!("reconnect baseDelayMs of 0 clamped to 1000");
            self.reconnect.base_delay_ms = 1_000;
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            warn!(
                base = self.reconnect.base_delay_ms,
                max = self.reconnect.max_delay_ms,
                "reconnect maxDelayMs below baseDelayMs, raising it"
            );
            self.reconnect.max_delay_ms = self.reconnect.base_delay_ms;
        }
    }
}

/// Resolve the default settings file path (`~/.spindl/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".spindl").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<SpindlSettings, SettingsError> {
    let defaults = serde_json::to_value(SpindlSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SpindlSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.normalize();
    Ok(settings)
}

/// Recursive deep merge: source objects override target per key, everything
/// else replaces, `null` preserves the target value.
fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

fn apply_env_overrides(settings: &mut SpindlSettings) {
    if let Some(v) = read_env_string("SPINDL_API_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = read_env_string("SPINDL_API_TOKEN") {
        settings.api.auth_token = Some(v);
    }
    if let Some(v) = read_env_string("SPINDL_SOCKET_URL") {
        settings.socket.url = v;
    }
    if let Some(v) = read_env_string("SPINDL_APP_KEY") {
        settings.socket.app_key = v;
    }
    if let Some(v) = read_env_u64("SPINDL_RECONNECT_BASE_MS", 1, 600_000) {
        settings.reconnect.base_delay_ms = v;
    }
    if let Some(v) = read_env_u64("SPINDL_RECONNECT_MAX_MS", 1, 3_600_000) {
        settings.reconnect.max_delay_ms = v;
    }
}

/// Parse a string as a `u64` within a range.
fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `RELAY_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::RelaySettings;

/// Resolve the path to the settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults with the settings file (if any) merged over them.
fn load_file_layer(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
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

/// Apply environment variable overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply `RELAY_*` overrides read through `lookup`.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_overrides_from(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("RELAY_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("RELAY_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.usize("RELAY_MAX_MESSAGE_SIZE", 1, 64 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }
    if let Some(v) = env.string("RELAY_ALLOWED_ORIGINS") {
        settings.server.allowed_origins = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect();
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.usize("RELAY_HISTORY_CAPACITY", 0, 10_000) {
        settings.relay.history_capacity = v;
    }
    if let Some(v) = env.enum_value("RELAY_HISTORY_SCOPE") {
        settings.relay.history_scope = v;
    }
    if let Some(v) = env.usize("RELAY_OUTBOUND_QUEUE_CAPACITY", 1, 1_000_000) {
        settings.relay.outbound_queue_capacity = v;
    }
    if let Some(v) = env.u64("RELAY_IDLE_TIMEOUT_MS", 100, 3_600_000) {
        settings.relay.idle_timeout_ms = v;
    }
    if let Some(v) = env.u64("RELAY_WRITE_TIMEOUT_MS", 100, 3_600_000) {
        settings.relay.write_timeout_ms = v;
    }
    if let Some(v) = env.bool("RELAY_ECHO_TO_SENDER") {
        settings.relay.echo_to_sender = v;
    }
    if let Some(v) = env.enum_value("RELAY_TRANSFORM") {
        settings.relay.transform = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers ────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn checked<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.checked(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.checked(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.checked(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.checked(name, "usize", |v| parse_usize_range(v, min, max))
    }

    /// Parse a serde enum from its string form, e.g. `"perConnection"`.
    fn enum_value<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.checked(name, "enum", |v| {
            serde_json::from_value(Value::String(v.to_owned())).ok()
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

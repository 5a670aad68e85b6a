//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`NichikaSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `NICHIKA_*` environment overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use nichika_logging::LogFormat;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::NichikaSettings;

/// Resolve the path to the settings file (`~/.nichika/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".nichika").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON, or a merged result that
/// fails [`NichikaSettings::validate`], is an error.
pub fn load_settings_from_path(path: &Path) -> Result<NichikaSettings> {
    load_with_env(path, |key| std::env::var(key).ok())
}

/// [`load_settings_from_path`] with an explicit environment lookup.
pub fn load_with_env<F>(path: &Path, env: F) -> Result<NichikaSettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(NichikaSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: NichikaSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `NICHIKA_*` overrides read through `env`.
///
/// Integers must parse and fall within range; anything else is logged and
/// ignored, leaving the file/default value in place.
pub fn apply_env_overrides<F>(settings: &mut NichikaSettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader(env);

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("NICHIKA_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("NICHIKA_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("NICHIKA_MAX_CONNECTIONS", 1, 1_000_000) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.u64("NICHIKA_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
        settings.server.heartbeat_interval_secs = v;
    }
    if let Some(v) = env.u64("NICHIKA_HEARTBEAT_TIMEOUT_SECS", 1, 86_400) {
        settings.server.heartbeat_timeout_secs = v;
    }
    if let Some(v) = env.usize("NICHIKA_MAX_MESSAGE_SIZE", 1, 64 * 1024 * 1024) {
        settings.server.max_message_size = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = env.usize("NICHIKA_INTAKE_CAPACITY", 1, 1_000_000) {
        settings.hub.intake_capacity = v;
    }
    if let Some(v) = env.usize("NICHIKA_CLIENT_BUFFER", 0, 1_000_000) {
        settings.hub.client_buffer = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("NICHIKA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("NICHIKA_LOG_FORMAT") {
        match v.parse::<LogFormat>() {
            Ok(format) => settings.logging.format = format,
            Err(_) => {
                tracing::warn!(key = "NICHIKA_LOG_FORMAT", value = %v, "invalid log format, ignoring");
            }
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F>(F);

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn checked<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.0)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.checked(name, |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.checked(name, |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.checked(name, |v| parse_usize_range(v, min, max))
    }
}

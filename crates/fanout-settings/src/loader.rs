//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`FanoutSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge it over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate values that would otherwise panic or stall at runtime
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::FanoutSettings;

/// Load settings from defaults and the process environment only.
pub fn load_settings() -> Result<FanoutSettings> {
    let mut settings = FanoutSettings::default();
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Load settings from a JSON file with env var overrides.
///
/// If the file does not exist, defaults are used. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<FanoutSettings> {
    let defaults = serde_json::to_value(FanoutSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: FanoutSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
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

/// Longest accepted relay poll interval, in seconds.
pub const MAX_POLL_INTERVAL_SECS: f64 = 60.0;
/// Longest accepted graceful shutdown timeout, in seconds.
pub const MAX_GRACEFUL_TIMEOUT_SECS: u64 = 86_400;
/// Longest accepted drain check interval, in seconds.
pub const MAX_LOG_INTERVAL_SECS: u64 = 3_600;

/// Reject values the runtime cannot work with.
///
/// File values get the same bounds as environment overrides, so nothing
/// that loads can overflow a `Duration` or a deadline later.
pub fn validate(settings: &FanoutSettings) -> Result<()> {
    let poll = settings.store.poll_interval_secs;
    if !poll.is_finite() || poll <= 0.0 || poll > MAX_POLL_INTERVAL_SECS {
        return Err(SettingsError::InvalidValue(format!(
            "store.pollIntervalSecs must be in (0, {MAX_POLL_INTERVAL_SECS}], got {poll}"
        )));
    }
    let timeout = settings.shutdown.graceful_timeout_secs;
    if timeout > MAX_GRACEFUL_TIMEOUT_SECS {
        return Err(SettingsError::InvalidValue(format!(
            "shutdown.gracefulTimeoutSecs must be at most {MAX_GRACEFUL_TIMEOUT_SECS}, got {timeout}"
        )));
    }
    let interval = settings.shutdown.log_interval_secs;
    if interval == 0 || interval > MAX_LOG_INTERVAL_SECS {
        return Err(SettingsError::InvalidValue(format!(
            "shutdown.logIntervalSecs must be in [1, {MAX_LOG_INTERVAL_SECS}], got {interval}"
        )));
    }
    if settings.server.outbound_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "server.outboundQueue must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut FanoutSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Invalid values are ignored with a warning, falling back to file/default.
pub fn apply_overrides<F>(settings: &mut FanoutSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("REDIS_URL") {
        settings.store.url = v;
    }
    if let Some(v) = env.string("REDIS_BROADCAST_CHANNEL") {
        settings.store.broadcast_channel = v;
    }
    if let Some(v) = env.string("WS_CONNECTIONS_KEY") {
        settings.store.connections_key = v;
    }
    if let Some(v) = env.f64("REDIS_PUBSUB_POLL_INTERVAL", 0.0, MAX_POLL_INTERVAL_SECS) {
        settings.store.poll_interval_secs = v;
    }

    // ── Shutdown ────────────────────────────────────────────────────
    if let Some(v) = env.u64("GRACEFUL_SHUTDOWN_TIMEOUT", 0, MAX_GRACEFUL_TIMEOUT_SECS) {
        settings.shutdown.graceful_timeout_secs = v;
    }
    if let Some(v) = env.u64("GRACEFUL_SHUTDOWN_LOG_INTERVAL", 1, MAX_LOG_INTERVAL_SECS) {
        settings.shutdown.log_interval_secs = v;
    }

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("FANOUT_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("FANOUT_PORT", 1, 65_535) {
        settings.server.port = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("FANOUT_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("FANOUT_LOG_JSON") {
        settings.logging.json = v;
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

/// Parse a string as a `u16` within an inclusive range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a finite `f64` in `(min, max]`.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && n > min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        let val = (self.lookup)(name)?;
        let result = parse_f64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid float env var, ignoring");
        }
        result
    }
}

//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`MailbackSettings::default()`]
//! 2. If `~/.mailback/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `MAILBACK_*` environment variable overrides (highest priority)
//! 4. [`MailbackSettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use mailback_core::constants::NAME;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::MailbackSettings;

/// Resolve the path to the settings file (`~/.mailback/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(format!(".{NAME}")).join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<MailbackSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are
/// errors.
pub fn load_settings_from_path(path: &Path) -> Result<MailbackSettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<MailbackSettings> {
    let defaults = serde_json::to_value(MailbackSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: MailbackSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
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

/// Apply `MAILBACK_*` environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut MailbackSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `env`.
///
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_overrides(settings: &mut MailbackSettings, env: impl Fn(&str) -> Option<String>) {
    let vars = EnvReader { env };

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = vars.string("MAILBACK_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = vars.u64_in("MAILBACK_POOL_SIZE", 1, 64) {
        settings.store.pool_size = u32::try_from(v).unwrap_or(settings.store.pool_size);
    }

    // ── References ──────────────────────────────────────────────────
    if let Some(v) = vars.string("MAILBACK_REFERENCE_PREFIX") {
        if is_valid_prefix(&v) {
            settings.references.prefix = v;
        } else {
            warn!(key = "MAILBACK_REFERENCE_PREFIX", value = %v, "invalid reference prefix, ignoring");
        }
    }

    // ── Correlation / lifecycle ─────────────────────────────────────
    if let Some(v) = vars.u64_in("MAILBACK_TEMPORAL_WINDOW_HOURS", 1, 8_760) {
        settings.correlation.temporal.window_hours = v;
    }
    if let Some(v) = vars.u64_in("MAILBACK_SWEEP_INTERVAL_SECS", 1, 86_400) {
        settings.lifecycle.sweep_interval_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = vars.string("MAILBACK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = vars.bool("MAILBACK_LOG_JSON") {
        settings.logging.json = v;
    }
}

fn is_valid_prefix(v: &str) -> bool {
    (1..=4).contains(&v.len()) && v.chars().all(|c| c.is_ascii_uppercase())
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

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    env: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.env)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.env)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.env)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format. Each type implements [`Default`] with production values, and
//! `#[serde(default)]` lets a partial file fill in the rest.

mod correlation;

pub use correlation::*;

use std::path::PathBuf;

use mailback_core::constants::{DEFAULT_REFERENCE_PREFIX, DEFAULT_SEQUENCE_WIDTH, NAME};
use serde::{Deserialize, Serialize};

/// Root settings type for mailback.
///
/// ```json
/// {
///   "references": { "prefix": "MB" },
///   "correlation": { "temporal": { "windowHours": 72 } }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MailbackSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Context store location and pool sizing.
    pub store: StoreSettings,
    /// Reference code grammar.
    pub references: ReferenceSettings,
    /// TTLs and sweep cadence.
    pub lifecycle: LifecycleSettings,
    /// Matcher thresholds.
    pub correlation: CorrelationSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for MailbackSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: NAME.to_string(),
            store: StoreSettings::default(),
            references: ReferenceSettings::default(),
            lifecycle: LifecycleSettings::default(),
            correlation: CorrelationSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Context store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database file. A leading `~/` is expanded against `$HOME`.
    pub db_path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// `SQLite` busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: format!("~/.{NAME}/database/{NAME}.db"),
            pool_size: 16,
            busy_timeout_ms: 30_000,
        }
    }
}

impl StoreSettings {
    /// The database path with `~/` expanded.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }
}

/// Reference code grammar settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReferenceSettings {
    /// Code prefix, 1-4 uppercase ASCII letters.
    pub prefix: String,
    /// Zero-padded width of the sequence part, 3-9.
    pub sequence_width: usize,
}

impl Default for ReferenceSettings {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_REFERENCE_PREFIX.to_string(),
            sequence_width: DEFAULT_SEQUENCE_WIDTH,
        }
    }
}

/// Context lifetime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleSettings {
    /// TTL applied to outbound contexts when the caller gives none.
    pub default_ttl_hours: u64,
    /// TTL of clarification (disambiguation) contexts.
    pub disambiguation_ttl_hours: u64,
    /// Interval of the background expiry sweep.
    pub sweep_interval_secs: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            default_ttl_hours: 720,
            disambiguation_ttl_hours: 72,
            sweep_interval_secs: 300,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Expand a leading `~/` against `$HOME` (falls back to `/tmp`).
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(path),
    }
}

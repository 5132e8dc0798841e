//! # mailback-settings
//!
//! Layered configuration for mailback.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`MailbackSettings::default()`])
//! 2. **User file** `~/.mailback/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** `MAILBACK_*` overrides (highest priority)
//!
//! The result is validated before it is returned.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;
mod validate;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<MailbackSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.mailback/settings.json` with env
/// var overrides; if loading fails, compiled defaults are used.
pub fn get_settings() -> &'static MailbackSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            MailbackSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: MailbackSettings) -> std::result::Result<(), MailbackSettings> {
    SETTINGS.set(settings)
}

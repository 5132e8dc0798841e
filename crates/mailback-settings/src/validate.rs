//! Range checks applied after loading.

use mailback_core::ReferenceGrammar;

use crate::errors::{Result, SettingsError};
use crate::types::MailbackSettings;

impl MailbackSettings {
    /// Reject values no component can work with.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let s = &self.store;
        check(!s.db_path.trim().is_empty(), "store.dbPath must not be empty")?;
        check((1..=64).contains(&s.pool_size), "store.poolSize must be 1-64")?;

        let _ = ReferenceGrammar::new(&self.references.prefix, self.references.sequence_width)
            .map_err(|e| SettingsError::InvalidValue(format!("references: {e}")))?;

        let l = &self.lifecycle;
        check(l.default_ttl_hours > 0, "lifecycle.defaultTtlHours must be > 0")?;
        check(
            l.disambiguation_ttl_hours > 0,
            "lifecycle.disambiguationTtlHours must be > 0",
        )?;
        check(l.sweep_interval_secs > 0, "lifecycle.sweepIntervalSecs must be > 0")?;

        let c = &self.correlation;
        check(c.fuzzy.max_distance <= 2, "correlation.fuzzy.maxDistance must be 0-2")?;

        let t = &c.template;
        check(unit(t.min_score), "correlation.template.minScore must be in 0..=1")?;
        check(unit(t.min_margin), "correlation.template.minMargin must be in 0..=1")?;
        check(
            unit(t.min_candidate_score) && t.min_candidate_score <= t.min_score,
            "correlation.template.minCandidateScore must be in 0..=minScore",
        )?;
        check(t.top_k >= 2, "correlation.template.topK must be >= 2")?;
        check(
            t.zone_radius > 0.0 && t.zone_radius <= 1.0,
            "correlation.template.zoneRadius must be in (0, 1]",
        )?;

        let w = &c.temporal;
        check(w.window_hours > 0, "correlation.temporal.windowHours must be > 0")?;
        check(
            (2..=26).contains(&w.max_choices),
            "correlation.temporal.maxChoices must be 2-26",
        )?;

        check(!self.logging.level.trim().is_empty(), "logging.level must not be empty")
    }
}

fn unit(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

fn check(ok: bool, message: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(message.to_string()))
    }
}

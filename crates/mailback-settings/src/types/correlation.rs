//! Matcher thresholds.

use serde::{Deserialize, Serialize};

/// Container for the per-stage correlation settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorrelationSettings {
    /// Fuzzy reference pass.
    pub fuzzy: FuzzySettings,
    /// Template fingerprint scoring.
    pub template: TemplateSettings,
    /// Recency fallback.
    pub temporal: TemporalSettings,
    /// Claim behavior.
    pub claim: ClaimSettings,
}

/// Fuzzy reference matching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FuzzySettings {
    /// Largest accepted Levenshtein distance on compact codes.
    pub max_distance: usize,
}

impl Default for FuzzySettings {
    fn default() -> Self {
        Self { max_distance: 1 }
    }
}

/// Template fingerprint scoring thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateSettings {
    /// Minimum score for the top candidate to be accepted.
    pub min_score: f64,
    /// Minimum lead of the top candidate over the runner-up.
    pub min_margin: f64,
    /// Candidates below this score are dropped before ranking.
    pub min_candidate_score: f64,
    /// Candidates returned when ambiguous.
    pub top_k: usize,
    /// Distance (page units) at which zone proximity falls to zero.
    pub zone_radius: f64,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            min_score: 0.6,
            min_margin: 0.15,
            min_candidate_score: 0.25,
            top_k: 3,
            zone_radius: 0.25,
        }
    }
}

/// Recency fallback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemporalSettings {
    /// Recency window on `updatedAt`.
    pub window_hours: u64,
    /// Most recent candidates offered when ambiguous.
    pub max_choices: usize,
}

impl Default for TemporalSettings {
    fn default() -> Self {
        Self {
            window_hours: 168,
            max_choices: 4,
        }
    }
}

/// Claim behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimSettings {
    /// On a lost claim race, try the next-best candidate once.
    pub retry_next_candidate: bool,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            retry_next_candidate: true,
        }
    }
}

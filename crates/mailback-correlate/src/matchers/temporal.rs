//! Temporal fallback: implicit continuation of the user's most recent context.

use chrono::Duration;
use mailback_settings::TemporalSettings;
use tracing::debug;

use crate::errors::Result;
use crate::matchers::{MatchInput, Matcher};
use crate::outcome::{AuditNote, MatchOutcome, MatchStage, ScoredCandidate};

/// Recency matcher over a fixed window.
pub struct TemporalMatcher {
    window: Duration,
    max_choices: usize,
}

impl TemporalMatcher {
    /// Create a matcher from settings.
    pub fn new(settings: &TemporalSettings) -> Self {
        let hours = i64::try_from(settings.window_hours).unwrap_or(i64::MAX / 3600);
        Self {
            window: Duration::hours(hours),
            max_choices: settings.max_choices.max(2),
        }
    }

    /// The recency window.
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Matcher for TemporalMatcher {
    fn stage(&self) -> MatchStage {
        MatchStage::Temporal
    }

    fn find(&self, input: &MatchInput<'_>, _notes: &mut Vec<AuditNote>) -> Result<MatchOutcome> {
        let since = input.now - self.window;
        #[allow(clippy::cast_precision_loss)]
        let window_ms = self.window.num_milliseconds().max(1) as f64;

        // pool is already ordered by updated_at DESC, id DESC
        let mut recent: Vec<ScoredCandidate> = input
            .pool
            .iter()
            .filter(|c| c.updated_at >= since)
            .map(|c| {
                #[allow(clippy::cast_precision_loss)]
                let age = (input.now - c.updated_at).num_milliseconds().max(0) as f64;
                ScoredCandidate::new(c.clone(), (1.0 - age / window_ms).clamp(0.0, 1.0))
            })
            .collect();

        debug!(window_hours = self.window.num_hours(), candidates = recent.len(), "temporal pool");
        Ok(match recent.len() {
            0 => MatchOutcome::NotFound,
            1 => MatchOutcome::found(recent.remove(0)),
            _ => {
                recent.truncate(self.max_choices);
                MatchOutcome::Ambiguous { candidates: recent }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use mailback_core::{ContextType, ConversationContext, InboundDocument, ReferenceGrammar};
    use mailback_store::ContextStore;

    use crate::matchers::test_support::{ctx, t0};

    fn run(window_hours: u64, pool: &[ConversationContext]) -> MatchOutcome {
        let store = ContextStore::in_memory(ReferenceGrammar::new("MB", 5).unwrap()).unwrap();
        let doc = InboundDocument::new("u1", "ok");
        let input = MatchInput {
            store: &store,
            document: &doc,
            open: pool,
            pool,
            now: t0(),
        };
        TemporalMatcher::new(&TemporalSettings {
            window_hours,
            max_choices: 4,
        })
        .find(&input, &mut Vec::new())
        .unwrap()
    }

    #[test]
    fn both_in_window_is_ambiguous_most_recent_first() {
        let email = ctx("ctx_e", 2, ContextType::Email, Duration::minutes(10));
        let shop = ctx("ctx_s", 1, ContextType::Shopping, Duration::hours(2));
        assert_matches!(
            run(24, &[email, shop]),
            MatchOutcome::Ambiguous { candidates }
                if candidates.iter().map(|c| c.context.id.as_str()).collect::<Vec<_>>() == ["ctx_e", "ctx_s"]
        );
    }

    #[test]
    fn window_excluding_older_resolves_to_recent() {
        let email = ctx("ctx_e", 2, ContextType::Email, Duration::minutes(10));
        let shop = ctx("ctx_s", 1, ContextType::Shopping, Duration::hours(2));
        assert_matches!(
            run(1, &[email, shop]),
            MatchOutcome::Found { best, runners_up }
                if best.context.id.as_str() == "ctx_e" && runners_up.is_empty()
        );
    }

    #[test]
    fn empty_window_is_not_found() {
        let old = ctx("ctx_o", 1, ContextType::Inquiry, Duration::days(30));
        assert_eq!(run(168, &[old]), MatchOutcome::NotFound);
        assert_eq!(run(168, &[]), MatchOutcome::NotFound);
    }

    #[test]
    fn choices_are_capped() {
        let pool: Vec<_> = (0..6)
            .map(|i| ctx(&format!("ctx_{i}"), i, ContextType::Email, Duration::hours(i64::try_from(i).unwrap())))
            .collect();
        assert_matches!(run(168, &pool), MatchOutcome::Ambiguous { candidates } if candidates.len() == 4);
    }

    #[test]
    fn fresher_scores_higher() {
        let a = ctx("ctx_a", 1, ContextType::Email, Duration::hours(1));
        let b = ctx("ctx_b", 2, ContextType::Email, Duration::hours(10));
        let MatchOutcome::Ambiguous { candidates } = run(24, &[a, b]) else {
            panic!("expected ambiguity");
        };
        assert!(candidates[0].score > candidates[1].score);
    }
}

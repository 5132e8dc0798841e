//! Reference matcher: explicit correlation codes, exact then bounded fuzzy.
//!
//! Strict pass: every syntactically valid code on the page (and the
//! interpreter's own guess) is looked up exactly. Codes that resolve to an
//! open context of the user are hits; codes of expired or consumed contexts
//! become audit notes. When the page carries no valid code at all, a fuzzy
//! pass compares normalized fragments against the user's open codes only,
//! accepting a hit at edit distance `<= max_distance` when it is unique.

use mailback_core::{ConversationContext, ReferenceGrammar, ReferenceId};
use tracing::debug;

use crate::errors::Result;
use crate::matchers::{MatchInput, Matcher};
use crate::outcome::{AuditNote, MatchOutcome, MatchStage, ScoredCandidate};

/// Score per unit of edit distance lost by a fuzzy hit.
const FUZZY_PENALTY: f64 = 0.1;

/// Exact and fuzzy lookup by reference code.
pub struct ReferenceMatcher {
    grammar: ReferenceGrammar,
    max_distance: usize,
}

impl ReferenceMatcher {
    /// Create a matcher for `grammar`, accepting fuzzy hits up to `max_distance`.
    pub fn new(grammar: ReferenceGrammar, max_distance: usize) -> Self {
        Self {
            grammar,
            max_distance,
        }
    }

    /// Valid codes on the page, the interpreter's guess first.
    pub fn strict_tokens(&self, input: &MatchInput<'_>) -> Vec<ReferenceId> {
        let doc = input.document;
        let mut tokens: Vec<ReferenceId> = doc
            .best_effort_reference_id
            .as_deref()
            .and_then(|hint| self.grammar.parse(hint).ok())
            .into_iter()
            .collect();
        for token in self.grammar.find_all(&doc.extracted_text) {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        tokens
    }

    fn strict(
        &self,
        input: &MatchInput<'_>,
        tokens: &[ReferenceId],
        notes: &mut Vec<AuditNote>,
    ) -> Result<Vec<ConversationContext>> {
        let mut hits = Vec::new();
        for token in tokens {
            if let Some(ctx) = input.open.iter().find(|c| &c.reference_id == token) {
                hits.push(ctx.clone());
                continue;
            }
            let Some(ctx) = input
                .store
                .find_by_reference(&input.document.user_id, token)?
            else {
                debug!(reference_id = %token, "reference not found for user");
                continue;
            };
            let note = AuditNote::closed_reference(&ctx, token.clone(), input.now);
            debug!(reference_id = %token, ?note, "reference points at a closed context");
            notes.push(note);
        }
        Ok(hits)
    }

    fn fuzzy(&self, input: &MatchInput<'_>) -> Vec<(usize, ConversationContext)> {
        let doc = input.document;
        let mut fragments = self
            .grammar
            .fuzzy_candidates(&doc.extracted_text, self.max_distance);
        if let Some(hint) = doc.best_effort_reference_id.as_deref() {
            fragments.insert(0, self.grammar.normalize_compact(hint));
        }
        if fragments.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, ConversationContext)> = input
            .open
            .iter()
            .filter_map(|ctx| {
                let code = ctx.reference_id.compact();
                fragments
                    .iter()
                    .map(|f| strsim::levenshtein(f, &code))
                    .min()
                    .filter(|d| *d <= self.max_distance)
                    .map(|d| (d, ctx.clone()))
            })
            .collect();
        let Some(best) = scored.iter().map(|(d, _)| *d).min() else {
            return Vec::new();
        };
        scored.retain(|(d, _)| *d == best);
        scored
    }
}

impl Matcher for ReferenceMatcher {
    fn stage(&self) -> MatchStage {
        MatchStage::Reference
    }

    fn find(&self, input: &MatchInput<'_>, notes: &mut Vec<AuditNote>) -> Result<MatchOutcome> {
        let tokens = self.strict_tokens(input);
        if !tokens.is_empty() {
            let mut hits = self.strict(input, &tokens, notes)?;
            debug!(tokens = tokens.len(), hits = hits.len(), "strict reference pass");
            return Ok(match hits.len() {
                0 => MatchOutcome::NotFound,
                1 => MatchOutcome::found(ScoredCandidate::new(hits.remove(0), 1.0)),
                _ => MatchOutcome::Ambiguous {
                    candidates: hits.into_iter().map(|c| ScoredCandidate::new(c, 1.0)).collect(),
                },
            });
        }

        let mut hits = self.fuzzy(input);
        debug!(hits = hits.len(), "fuzzy reference pass");
        #[allow(clippy::cast_precision_loss)]
        let score = |d: usize| 1.0 - FUZZY_PENALTY * d as f64;
        Ok(match hits.len() {
            0 => MatchOutcome::NotFound,
            1 => {
                let (d, ctx) = hits.remove(0);
                MatchOutcome::found(ScoredCandidate::new(ctx, score(d)))
            }
            _ => MatchOutcome::Ambiguous {
                candidates: hits
                    .into_iter()
                    .map(|(d, c)| ScoredCandidate::new(c, score(d)))
                    .collect(),
            },
        })
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use mailback_core::{ContextData, ContextStatus, InboundDocument, NewContext, UserId};
    use mailback_store::ContextStore;
    use serde_json::json;

    use crate::matchers::test_support::t0;

    struct Fixture {
        store: ContextStore,
        matcher: ReferenceMatcher,
    }

    impl Fixture {
        fn new() -> Self {
            let grammar = ReferenceGrammar::new("MB", 5).unwrap();
            Self {
                store: ContextStore::in_memory(grammar.clone()).unwrap(),
                matcher: ReferenceMatcher::new(grammar, 1),
            }
        }

        fn create(&self, user: &str, ttl: Duration) -> ConversationContext {
            self.store
                .create_context(
                    &NewContext::new(user, ContextData::Email(json!({})), ttl),
                    t0() - Duration::hours(1),
                )
                .unwrap()
        }

        fn run(&self, doc: &InboundDocument) -> (MatchOutcome, Vec<AuditNote>) {
            let open = self
                .store
                .find_active_by_user(&doc.user_id, None, t0())
                .unwrap();
            let input = MatchInput {
                store: &self.store,
                document: doc,
                open: &open,
                pool: &open,
                now: t0(),
            };
            let mut notes = Vec::new();
            let outcome = self.matcher.find(&input, &mut notes).unwrap();
            (outcome, notes)
        }
    }

    #[test]
    fn exact_code_anywhere_in_text() {
        let f = Fixture::new();
        let _a = f.create("u1", Duration::days(1));
        let b = f.create("u1", Duration::days(1));
        let doc = InboundDocument::new(
            "u1",
            "Thanks for the list.\nI'll take the second one\n\n   ref: mb-2026-00002  ",
        );
        let (outcome, notes) = f.run(&doc);
        assert_matches!(outcome, MatchOutcome::Found { best, .. } if best.context.id == b.id);
        assert!(notes.is_empty());
    }

    #[test]
    fn hint_is_used_when_text_lacks_code() {
        let f = Fixture::new();
        let a = f.create("u1", Duration::days(1));
        let doc = InboundDocument::new("u1", "yes please").with_reference_hint("MB-2026-00001");
        let (outcome, _) = f.run(&doc);
        assert_matches!(outcome, MatchOutcome::Found { best, .. } if best.context.id == a.id);
    }

    #[test]
    fn two_distinct_codes_are_ambiguous() {
        let f = Fixture::new();
        f.create("u1", Duration::days(1));
        f.create("u1", Duration::days(1));
        let doc = InboundDocument::new("u1", "MB-2026-00001 and MB-2026-00002");
        let (outcome, _) = f.run(&doc);
        assert_matches!(outcome, MatchOutcome::Ambiguous { candidates } if candidates.len() == 2);
    }

    #[test]
    fn expired_reference_is_not_found_with_note() {
        let f = Fixture::new();
        let a = f.create("u1", Duration::minutes(30));
        let doc = InboundDocument::new("u1", "MB-2026-00001");
        let (outcome, notes) = f.run(&doc);
        assert_eq!(outcome, MatchOutcome::NotFound);
        assert_eq!(
            notes,
            vec![AuditNote::ExpiredContextReferenced {
                context_id: a.id,
                reference_id: a.reference_id,
            }]
        );
    }

    #[test]
    fn consumed_reference_is_not_found_with_note() {
        let f = Fixture::new();
        let a = f.create("u1", Duration::days(1));
        f.store
            .claim(&UserId::from("u1"), &a.id, ContextStatus::Active, t0())
            .unwrap();
        let (outcome, notes) = f.run(&InboundDocument::new("u1", "MB-2026-00001"));
        assert_eq!(outcome, MatchOutcome::NotFound);
        assert_matches!(notes.as_slice(), [AuditNote::ConsumedContextReferenced { .. }]);
    }

    #[test]
    fn other_users_codes_are_invisible() {
        let f = Fixture::new();
        f.create("u2", Duration::days(1));
        let (outcome, notes) = f.run(&InboundDocument::new("u1", "MB-2026-00001"));
        assert_eq!(outcome, MatchOutcome::NotFound);
        assert!(notes.is_empty());
    }

    #[test]
    fn valid_but_unknown_code_skips_fuzzy() {
        let f = Fixture::new();
        f.create("u1", Duration::days(1));
        // MB-2026-00011 is within distance 1 of the open code but is itself valid
        let (outcome, _) = f.run(&InboundDocument::new("u1", "MB-2026-00011"));
        assert_eq!(outcome, MatchOutcome::NotFound);
    }

    #[test]
    fn fuzzy_corrects_ocr_confusions() {
        let f = Fixture::new();
        let a = f.create("u1", Duration::days(1));
        let (outcome, _) = f.run(&InboundDocument::new("u1", "ref M8-2O26-OOOO1 thanks"));
        assert_matches!(outcome, MatchOutcome::Found { best, .. } if best.context.id == a.id);
    }

    #[test]
    fn fuzzy_accepts_one_edit() {
        let f = Fixture::new();
        let a = f.create("u1", Duration::days(1));
        // dropped digit
        let (outcome, _) = f.run(&InboundDocument::new("u1", "MB-2026-0001"));
        assert_matches!(
            outcome,
            MatchOutcome::Found { best, .. } if best.context.id == a.id && best.score < 1.0
        );
    }

    #[test]
    fn fuzzy_rejects_two_edits() {
        let f = Fixture::new();
        f.create("u1", Duration::days(1));
        let (outcome, _) = f.run(&InboundDocument::new("u1", "MB-2026-001"));
        assert_eq!(outcome, MatchOutcome::NotFound);
    }

    #[test]
    fn fuzzy_tie_is_ambiguous() {
        let f = Fixture::new();
        f.create("u1", Duration::days(1));
        f.create("u1", Duration::days(1));
        // one edit from both 00001 and 00002
        let (outcome, _) = f.run(&InboundDocument::new("u1", "MB-2026-0000"));
        assert_matches!(outcome, MatchOutcome::Ambiguous { candidates } if candidates.len() == 2);
    }
}

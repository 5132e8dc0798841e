//! Matcher stages of the correlation pipeline.
//!
//! Every stage is a pure read over a [`MatchInput`]: the inbound document,
//! the user's open contexts loaded once per evaluation, and the store for
//! lookups the open set cannot answer (expired or consumed references).
//!
//! - **[`reference`]**: explicit code, exact then bounded fuzzy
//! - **[`fingerprint`]**: structural similarity of markings to reply forms
//! - **[`temporal`]**: recency fallback

pub mod fingerprint;
pub mod reference;
pub mod temporal;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use mailback_core::{ContextId, ContextStatus, ContextType, ConversationContext, InboundDocument};
use mailback_store::ContextStore;

use crate::errors::Result;
use crate::outcome::{AuditNote, MatchOutcome, MatchStage, ScoredCandidate};

pub use fingerprint::TemplateMatcher;
pub use reference::ReferenceMatcher;
pub use temporal::TemporalMatcher;

/// Everything a stage may look at.
pub struct MatchInput<'a> {
    /// Store for point lookups.
    pub store: &'a ContextStore,
    /// The inbound document.
    pub document: &'a InboundDocument,
    /// All of the user's open, unexpired contexts, most recently updated first.
    pub open: &'a [ConversationContext],
    /// The subset later stages may choose from: pending clarifications
    /// collapsed, and narrowed to an earlier stage's ambiguous set if any.
    pub pool: &'a [ConversationContext],
    /// Evaluation instant.
    pub now: DateTime<Utc>,
}

/// One stage of the pipeline.
pub trait Matcher: Send + Sync {
    /// Which stage this is.
    fn stage(&self) -> MatchStage;

    /// Evaluate the stage. Must not mutate the store.
    fn find(&self, input: &MatchInput<'_>, notes: &mut Vec<AuditNote>) -> Result<MatchOutcome>;
}

/// Represent every context awaiting an open clarification by that clarification.
///
/// A reply without a code should continue the clarification round-trip
/// rather than trigger a clarification of the clarification.
pub fn collapse_pending(open: &[ConversationContext]) -> Vec<ConversationContext> {
    let listed: HashSet<&ContextId> = open
        .iter()
        .filter_map(|c| c.context_data.as_disambiguation())
        .flat_map(|p| p.choices.iter().map(|choice| &choice.context_id))
        .collect();

    open.iter()
        .filter(|c| {
            !(c.status == ContextStatus::AwaitingDisambiguation && listed.contains(&c.id))
        })
        .cloned()
        .collect()
}

/// Narrow `pool` to the contexts named by `candidates`, keeping pool order.
pub fn restrict_to(
    pool: &[ConversationContext],
    candidates: &[ScoredCandidate],
) -> Vec<ConversationContext> {
    let keep: HashSet<&ContextId> = candidates.iter().map(|c| &c.context.id).collect();
    pool.iter().filter(|c| keep.contains(&c.id)).cloned().collect()
}

/// Whether a candidate is a clarification the engine itself issued.
pub(crate) fn is_clarification(ctx: &ConversationContext) -> bool {
    ctx.context_type == ContextType::Disambiguation
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn collapse_hides_contexts_behind_open_clarification() {
        let mut a = ctx("ctx_a", 1, ContextType::Shopping, Duration::hours(3));
        let mut b = ctx("ctx_b", 2, ContextType::Shopping, Duration::hours(3));
        a.status = ContextStatus::AwaitingDisambiguation;
        b.status = ContextStatus::AwaitingDisambiguation;
        let d = clarifying(
            ctx("ctx_d", 3, ContextType::Disambiguation, Duration::hours(1)),
            &[&a, &b],
        );
        let other = ctx("ctx_e", 4, ContextType::Email, Duration::hours(2));

        let pool = collapse_pending(&[d.clone(), other.clone(), a, b]);
        let ids: Vec<&str> = pool.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["ctx_d", "ctx_e"]);
    }

    #[test]
    fn collapse_keeps_awaiting_contexts_whose_clarification_is_gone() {
        let mut a = ctx("ctx_a", 1, ContextType::Shopping, Duration::hours(3));
        a.status = ContextStatus::AwaitingDisambiguation;
        let pool = collapse_pending(&[a]);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn restrict_keeps_pool_order() {
        let a = ctx("ctx_a", 1, ContextType::Email, Duration::hours(1));
        let b = ctx("ctx_b", 2, ContextType::Email, Duration::hours(2));
        let c = ctx("ctx_c", 3, ContextType::Email, Duration::hours(3));
        let narrowed = restrict_to(
            &[a.clone(), b, c.clone()],
            &[ScoredCandidate::new(c, 0.9), ScoredCandidate::new(a, 0.8)],
        );
        let ids: Vec<&str> = narrowed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["ctx_a", "ctx_c"]);
    }
}

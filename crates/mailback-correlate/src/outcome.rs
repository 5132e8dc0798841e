//! Matcher results and the engine's final resolution values.

use std::fmt;

use chrono::{DateTime, Utc};
use mailback_core::{
    ClarificationArtifact, ContextId, ConversationContext, ReferenceId, Selection,
};
use serde::{Deserialize, Serialize};

/// A stage of the matching pipeline, in evaluation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStage {
    /// Explicit reference code, exact or fuzzy.
    Reference,
    /// Structural similarity of markings to reply forms.
    Template,
    /// Recency fallback.
    Temporal,
}

impl MatchStage {
    /// Stable name, also recorded on clarification contexts.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Template => "template",
            Self::Temporal => "temporal",
        }
    }
}

impl fmt::Display for MatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate context with the stage-specific score that ranked it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    /// The candidate.
    pub context: ConversationContext,
    /// Stage score in `0.0..=1.0`; higher is better.
    pub score: f64,
}

impl ScoredCandidate {
    /// Wrap a context with its score.
    pub fn new(context: ConversationContext, score: f64) -> Self {
        Self { context, score }
    }
}

/// Result of one matcher stage.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchOutcome {
    /// One candidate accepted.
    Found {
        /// The accepted candidate.
        best: ScoredCandidate,
        /// Other candidates that also cleared the acceptance bar, best first.
        /// Claimed in order if the best one is lost to a concurrent claim.
        runners_up: Vec<ScoredCandidate>,
    },
    /// Several viable candidates, best first.
    Ambiguous {
        /// The candidates.
        candidates: Vec<ScoredCandidate>,
    },
    /// No candidate.
    NotFound,
}

impl MatchOutcome {
    /// A single accepted candidate with no fallbacks.
    pub fn found(best: ScoredCandidate) -> Self {
        Self::Found {
            best,
            runners_up: Vec::new(),
        }
    }

    /// Whether the stage accepted a candidate.
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    /// Every candidate the outcome mentions, best first.
    pub fn candidates(&self) -> Vec<&ScoredCandidate> {
        match self {
            Self::Found { best, runners_up } => {
                std::iter::once(best).chain(runners_up.iter()).collect()
            }
            Self::Ambiguous { candidates } => candidates.iter().collect(),
            Self::NotFound => Vec::new(),
        }
    }
}

/// Something a matcher noticed that does not change the outcome but is
/// worth persisting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditNote {
    /// A legible code pointed at a context past its TTL.
    ExpiredContextReferenced {
        /// The expired context.
        context_id: ContextId,
        /// The code that was read.
        reference_id: ReferenceId,
    },
    /// A legible code pointed at a context that was already consumed.
    ConsumedContextReferenced {
        /// The consumed context.
        context_id: ContextId,
        /// The code that was read.
        reference_id: ReferenceId,
    },
}

impl AuditNote {
    /// Note for a reply that named `ctx` after it closed.
    pub fn closed_reference(ctx: &ConversationContext, reference_id: ReferenceId, now: DateTime<Utc>) -> Self {
        let context_id = ctx.id.clone();
        if ctx.is_expired_at(now) {
            Self::ExpiredContextReferenced {
                context_id,
                reference_id,
            }
        } else {
            Self::ConsumedContextReferenced {
                context_id,
                reference_id,
            }
        }
    }
}

/// A pure evaluation of the pipeline against one document.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// Stages run, in order.
    pub stages_tried: Vec<MatchStage>,
    /// Stage that produced `outcome`, if any candidate was produced.
    pub stage: Option<MatchStage>,
    /// Final outcome.
    pub outcome: MatchOutcome,
    /// Audit notes collected along the way.
    pub notes: Vec<AuditNote>,
}

/// Why a document resolved to no context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoContextReason {
    /// No stage produced a candidate. Process the reply as a new request.
    NothingMatched,
    /// Every claim attempt lost to a concurrent resolution.
    ClaimConflict,
    /// The reply chain already went through the maximum number of clarifications.
    ClarificationExhausted,
    /// The reply named no code and no choice, and only an outstanding
    /// clarification could take it.
    ClarificationPending,
}

/// Terminal result of resolving one document. Every document ends in exactly one.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// A single context was claimed for this reply.
    Claimed {
        /// The claimed context (status `consumed`).
        context: ConversationContext,
        /// Stage that found it.
        stage: MatchStage,
        /// What the user marked, when the reply form has selections.
        selection: Option<Selection>,
    },
    /// A clarification was issued instead of guessing.
    Clarification {
        /// Artifact for the rendering collaborator.
        artifact: ClarificationArtifact,
        /// The persisted `disambiguation` context backing it.
        disambiguation_context: ConversationContext,
    },
    /// No prior context applies.
    NoContext {
        /// Why.
        reason: NoContextReason,
    },
}

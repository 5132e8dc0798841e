//! Disambiguator: turns an ambiguous candidate set into a persisted
//! clarification round-trip.
//!
//! Candidates that are themselves clarifications are flattened into their
//! still-open choices and superseded, so a user never receives a form that
//! asks which form they meant.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use mailback_core::constants::MAX_DISAMBIGUATION_ROUNDS;
use mailback_core::{
    ClarificationArtifact, ClarificationCandidate, ContextId, ConversationContext,
    DisambiguationChoice, DisambiguationPayload, InboundDocument, UserId,
};
use mailback_store::{ContextStore, ListedChoice, NewDisambiguation};
use tracing::{debug, info};

use crate::errors::Result;
use crate::matchers::is_clarification;
use crate::outcome::{MatchStage, ScoredCandidate};

/// Printed selection markers; also the hard cap on choices per form.
const MARKERS: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// Candidate set after flattening nested clarifications.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Flattened {
    /// Domain contexts still open, in candidate order.
    pub contexts: Vec<ConversationContext>,
    /// Open clarifications that were flattened away.
    pub supersedes: Vec<ContextId>,
    /// Highest clarification round among the superseded.
    pub round: u32,
}

/// What to do with an ambiguous candidate set.
#[derive(Clone, Debug, PartialEq)]
pub enum Clarify {
    /// A clarification was issued.
    Issued {
        /// The persisted `disambiguation` context.
        context: ConversationContext,
        /// Artifact for the rendering collaborator.
        artifact: ClarificationArtifact,
    },
    /// Flattening left a single open context.
    Single(ConversationContext),
    /// Flattening left nothing open.
    Empty,
    /// The chain already used every allowed round.
    Exhausted,
}

/// Issues clarification contexts.
pub struct Disambiguator {
    ttl: Duration,
}

impl Disambiguator {
    /// Create a disambiguator issuing clarifications that live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Replace clarification candidates by their open choices.
    pub fn flatten(
        &self,
        store: &ContextStore,
        user_id: &UserId,
        candidates: &[&ConversationContext],
        now: DateTime<Utc>,
    ) -> Result<Flattened> {
        let mut out = Flattened::default();
        let mut seen = HashSet::new();
        for ctx in candidates {
            let Some(payload) = ctx.context_data.as_disambiguation() else {
                if ctx.is_visible_at(now) && seen.insert(ctx.id.clone()) {
                    out.contexts.push((*ctx).clone());
                }
                continue;
            };
            if ctx.is_visible_at(now) {
                out.supersedes.push(ctx.id.clone());
            }
            out.round = out.round.max(payload.round);
            for choice in &payload.choices {
                let Some(listed) = store.get_context(&choice.context_id)? else {
                    continue;
                };
                if &listed.user_id == user_id
                    && listed.is_visible_at(now)
                    && !is_clarification(&listed)
                    && seen.insert(listed.id.clone())
                {
                    out.contexts.push(listed);
                }
            }
        }
        Ok(out)
    }

    /// Persist a clarification over `candidates`, or report why none is needed.
    pub fn clarify(
        &self,
        store: &ContextStore,
        user_id: &UserId,
        stage: MatchStage,
        candidates: &[ScoredCandidate],
        now: DateTime<Utc>,
    ) -> Result<Clarify> {
        let refs: Vec<&ConversationContext> = candidates.iter().map(|c| &c.context).collect();
        let flat = self.flatten(store, user_id, &refs, now)?;
        self.issue(store, user_id, stage, flat, now)
    }

    /// Persist a clarification over an already flattened set.
    pub fn issue(
        &self,
        store: &ContextStore,
        user_id: &UserId,
        stage: MatchStage,
        mut flat: Flattened,
        now: DateTime<Utc>,
    ) -> Result<Clarify> {
        match flat.contexts.len() {
            0 => return Ok(Clarify::Empty),
            1 => return Ok(Clarify::Single(flat.contexts.remove(0))),
            _ => {}
        }
        let round = flat.round + 1;
        if round > MAX_DISAMBIGUATION_ROUNDS {
            info!(%user_id, round, "clarification rounds exhausted");
            return Ok(Clarify::Exhausted);
        }

        flat.contexts.truncate(MARKERS.len());
        let choices: Vec<ListedChoice> = flat
            .contexts
            .iter()
            .zip(MARKERS)
            .map(|(ctx, marker)| ListedChoice {
                choice: DisambiguationChoice {
                    marker: marker.to_string(),
                    context_id: ctx.id.clone(),
                    reference_id: ctx.reference_id.clone(),
                    context_type: ctx.context_type,
                    descriptor: ctx.descriptor(),
                },
                expected: ctx.status,
            })
            .collect();
        let count = choices.len();

        let request = NewDisambiguation {
            user_id: user_id.clone(),
            choices,
            origin_stage: stage.as_str().to_string(),
            round,
            supersedes: flat.supersedes,
            ttl: self.ttl,
        };
        let context = store.issue_disambiguation(&request, now)?;
        debug!(context_id = %context.id, choices = count, round, "clarification persisted");

        let artifact = ClarificationArtifact {
            user_id: user_id.clone(),
            candidates: request
                .choices
                .into_iter()
                .map(|ListedChoice { choice, .. }| ClarificationCandidate {
                    descriptor: choice.descriptor,
                    marker: choice.marker,
                })
                .collect(),
            new_reference_id: context.reference_id.clone(),
            disambiguation_context_id: context.id.clone(),
            expires_at: context.expires_at,
        };
        Ok(Clarify::Issued { context, artifact })
    }
}

/// The choice a reply to a clarification form selects, if exactly one.
///
/// Marked letters are read first, then marked numbers, then standalone
/// letter or number tokens in handwritten text that name a printed marker.
/// Printed text is never read. Conflicting selections read as no selection.
pub fn read_choice<'a>(
    doc: &InboundDocument,
    payload: &'a DisambiguationPayload,
) -> Option<&'a DisambiguationChoice> {
    let by_letter = doc
        .selected_letters()
        .into_iter()
        .filter_map(|l| payload.choice_by_marker(&l.to_string()));
    if let Some(pick) = single(by_letter) {
        return pick;
    }
    let by_number = doc
        .selected_numbers()
        .into_iter()
        .filter_map(|n| payload.choice_by_index(n));
    if let Some(pick) = single(by_number) {
        return pick;
    }
    let by_token = doc
        .annotations
        .iter()
        .filter(|mark| mark.kind.is_writing())
        .filter_map(|mark| mark.associated_text.as_deref())
        .flat_map(|text| text.split(|c: char| !c.is_ascii_alphanumeric()))
        .filter_map(|token| match token.len() {
            1 if token.chars().all(|c| c.is_ascii_uppercase()) => payload.choice_by_marker(token),
            1 | 2 if token.chars().all(|c| c.is_ascii_digit()) => {
                token.parse().ok().and_then(|n| payload.choice_by_index(n))
            }
            _ => None,
        });
    single(by_token).flatten()
}

/// `None` when the source named nothing, `Some(None)` when it named
/// several distinct choices, `Some(Some(choice))` for exactly one.
fn single<'a>(
    picks: impl Iterator<Item = &'a DisambiguationChoice>,
) -> Option<Option<&'a DisambiguationChoice>> {
    let mut found: Option<&DisambiguationChoice> = None;
    for pick in picks {
        match found {
            Some(prev) if prev.context_id != pick.context_id => return Some(None),
            _ => found = Some(pick),
        }
    }
    found.map(Some)
}

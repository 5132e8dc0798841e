//! The correlation engine: runs the matcher stages in order and turns the
//! outcome into exactly one [`Resolution`].
//!
//! ```text
//! document ─► reference ─► template ─► temporal
//!                 │            │           │
//!              found?       found?      found? ─► claim (retry once) ─► Claimed
//!                                          │
//!                                     ambiguous ─► Disambiguator ─► Clarification
//!                                          │
//!                                      nothing ─► NoContext
//! ```
//!
//! An ambiguous stage does not end the pipeline: later stages run over the
//! ambiguous set and may narrow it to one. A found clarification context
//! means the reply answers an earlier clarification; the selection on the
//! page decides which listed context is claimed.

use chrono::{DateTime, Duration, Utc};
use mailback_core::{ConversationContext, InboundDocument, Selection, UserId};
use mailback_settings::MailbackSettings;
use mailback_store::{ActivityAction, ContextStore};
use serde_json::json;
use tracing::{debug, info};

use crate::disambiguator::{Clarify, Disambiguator, read_choice};
use crate::errors::{CorrelationError, Result};
use crate::lifecycle::LifecycleManager;
use crate::matchers::{
    MatchInput, Matcher, ReferenceMatcher, TemplateMatcher, TemporalMatcher, collapse_pending,
    is_clarification, restrict_to,
};
use crate::outcome::{
    AuditNote, Evaluation, MatchOutcome, MatchStage, NoContextReason, Resolution, ScoredCandidate,
};

/// Correlates inbound documents with outstanding contexts.
pub struct CorrelationEngine {
    store: ContextStore,
    stages: Vec<Box<dyn Matcher>>,
    disambiguator: Disambiguator,
    lifecycle: LifecycleManager,
}

impl CorrelationEngine {
    /// Build the standard three-stage pipeline over `store`.
    pub fn new(store: ContextStore, settings: &MailbackSettings) -> Self {
        let correlation = &settings.correlation;
        let stages: Vec<Box<dyn Matcher>> = vec![
            Box::new(ReferenceMatcher::new(
                store.grammar().clone(),
                correlation.fuzzy.max_distance,
            )),
            Box::new(TemplateMatcher::new(correlation.template.clone())),
            Box::new(TemporalMatcher::new(&correlation.temporal)),
        ];
        let ttl = i64::try_from(settings.lifecycle.disambiguation_ttl_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX);
        Self {
            disambiguator: Disambiguator::new(ttl),
            lifecycle: LifecycleManager::new(store.clone(), correlation.claim.retry_next_candidate),
            stages,
            store,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Claim and expiry operations.
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Run the matcher stages without changing anything.
    pub fn evaluate(&self, doc: &InboundDocument, now: DateTime<Utc>) -> Result<Evaluation> {
        let open = self.store.find_active_by_user(&doc.user_id, None, now)?;
        let mut pool = collapse_pending(&open);
        let mut stages_tried = Vec::with_capacity(self.stages.len());
        let mut notes = Vec::new();
        let mut pending: Option<(MatchStage, Vec<ScoredCandidate>)> = None;

        debug!(user_id = %doc.user_id, open = open.len(), pool = pool.len(), "evaluating document");
        for matcher in &self.stages {
            let stage = matcher.stage();
            stages_tried.push(stage);
            let input = MatchInput {
                store: &self.store,
                document: doc,
                open: &open,
                pool: &pool,
                now,
            };
            let outcome = matcher.find(&input, &mut notes)?;
            match outcome {
                MatchOutcome::Found { .. } => {
                    debug!(%stage, "stage found a candidate");
                    return Ok(Evaluation {
                        stages_tried,
                        stage: Some(stage),
                        outcome,
                        notes,
                    });
                }
                MatchOutcome::Ambiguous { candidates } => {
                    debug!(%stage, candidates = candidates.len(), "stage ambiguous, narrowing");
                    pool = restrict_to(&open, &candidates);
                    pending = Some((stage, candidates));
                }
                MatchOutcome::NotFound => debug!(%stage, "stage found nothing"),
            }
        }

        Ok(match pending {
            Some((stage, candidates)) => Evaluation {
                stages_tried,
                stage: Some(stage),
                outcome: MatchOutcome::Ambiguous { candidates },
                notes,
            },
            None => Evaluation {
                stages_tried,
                stage: None,
                outcome: MatchOutcome::NotFound,
                notes,
            },
        })
    }

    /// Evaluate, then claim, clarify, or give up.
    pub fn resolve(&self, doc: &InboundDocument, now: DateTime<Utc>) -> Result<Resolution> {
        let user_id = &doc.user_id;
        let evaluation = self.evaluate(doc, now)?;
        self.record_notes(user_id, &evaluation.notes, now)?;

        let resolution = self.settle(doc, evaluation, false, now)?;
        log_resolution(user_id, &resolution);
        Ok(resolution)
    }

    /// Act on `evaluation`. A clarification lost to a concurrent issuance is
    /// re-evaluated once; `raced` marks that second pass.
    fn settle(
        &self,
        doc: &InboundDocument,
        evaluation: Evaluation,
        raced: bool,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        Ok(match (evaluation.stage, evaluation.outcome) {
            (Some(stage), MatchOutcome::Found { best, runners_up }) => {
                if is_clarification(&best.context) {
                    self.answer_clarification(doc, stage, &best.context, now)?
                } else {
                    let ranked: Vec<&ConversationContext> = std::iter::once(&best.context)
                        .chain(
                            runners_up
                                .iter()
                                .map(|c| &c.context)
                                .filter(|c| !is_clarification(c)),
                        )
                        .collect();
                    self.claim(doc, stage, &ranked, None, now)?
                }
            }
            (Some(stage), MatchOutcome::Ambiguous { candidates }) => {
                match self.clarify(doc, stage, &candidates, now)? {
                    Some(resolution) => resolution,
                    None if raced => no_context(NoContextReason::ClaimConflict),
                    None => {
                        debug!(user_id = %doc.user_id, "clarification issued concurrently, re-evaluating");
                        let evaluation = self.evaluate(doc, now)?;
                        self.settle(doc, evaluation, true, now)?
                    }
                }
            }
            _ => no_context(NoContextReason::NothingMatched),
        })
    }

    fn claim(
        &self,
        doc: &InboundDocument,
        stage: MatchStage,
        ranked: &[&ConversationContext],
        selection: Option<Selection>,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        Ok(match self.lifecycle.claim_with_retry(&doc.user_id, ranked, now)? {
            Some(context) => Resolution::Claimed {
                selection: selection.or_else(|| {
                    Selection::from_document(doc, context.context_type.reply_family())
                }),
                context,
                stage,
            },
            None => no_context(NoContextReason::ClaimConflict),
        })
    }

    /// `None` when a concurrent resolution changed the candidates first.
    fn clarify(
        &self,
        doc: &InboundDocument,
        stage: MatchStage,
        candidates: &[ScoredCandidate],
        now: DateTime<Utc>,
    ) -> Result<Option<Resolution>> {
        let issued = self
            .disambiguator
            .clarify(&self.store, &doc.user_id, stage, candidates, now);
        Ok(match conflict_as_none(issued)? {
            Some(Clarify::Single(context)) => Some(self.claim(doc, stage, &[&context], None, now)?),
            Some(other) => Some(clarify_resolution(other)),
            None => None,
        })
    }

    /// The reply answers clarification `pending`; claim the chosen context.
    ///
    /// A selection that names a choice no longer open claims nothing. With
    /// no readable selection, a reply carrying the clarification's code gets
    /// a fresh round; a reply without it leaves the outstanding form to be
    /// answered.
    fn answer_clarification(
        &self,
        doc: &InboundDocument,
        stage: MatchStage,
        pending: &ConversationContext,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let user_id = &doc.user_id;
        let Some(payload) = pending.context_data.as_disambiguation() else {
            return Ok(no_context(NoContextReason::NothingMatched));
        };

        if let Some(choice) = read_choice(doc, payload) {
            let listed = self
                .store
                .get_context(&choice.context_id)?
                .filter(|c| &c.user_id == user_id && !is_clarification(c));
            return match listed {
                Some(context) if context.is_visible_at(now) => {
                    debug!(%user_id, clarification = %pending.id, marker = %choice.marker, "clarification answered");
                    let selection = Some(Selection::Clarified(choice.marker.clone()));
                    self.claim_through(pending, &context, selection, stage, user_id, now)
                }
                closed => {
                    if let Some(context) = closed {
                        let note = AuditNote::closed_reference(&context, choice.reference_id.clone(), now);
                        self.record_notes(user_id, &[note], now)?;
                    }
                    info!(%user_id, clarification = %pending.id, marker = %choice.marker, "chosen context already closed");
                    Ok(no_context(NoContextReason::NothingMatched))
                }
            };
        }

        let flat = self
            .disambiguator
            .flatten(&self.store, user_id, &[pending], now)?;
        if flat.contexts.len() > 1 && stage != MatchStage::Reference {
            debug!(%user_id, clarification = %pending.id, "reply without code or selection, form still pending");
            return Ok(no_context(NoContextReason::ClarificationPending));
        }
        debug!(%user_id, clarification = %pending.id, "clarification answer unreadable, re-issuing");
        let issued = self.disambiguator.issue(&self.store, user_id, stage, flat, now);
        match conflict_as_none(issued)? {
            Some(Clarify::Single(context)) => {
                self.claim_through(pending, &context, None, stage, user_id, now)
            }
            Some(other) => Ok(clarify_resolution(other)),
            None => Ok(no_context(NoContextReason::ClaimConflict)),
        }
    }

    /// Consume `pending` and `chosen` together.
    fn claim_through(
        &self,
        pending: &ConversationContext,
        chosen: &ConversationContext,
        selection: Option<Selection>,
        stage: MatchStage,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Resolution> {
        let claimed = self.store.claim_with_disambiguation(
            user_id,
            &pending.id,
            &chosen.id,
            chosen.status,
            now,
        );
        Ok(match claimed {
            Ok((_, context)) => Resolution::Claimed {
                context,
                stage,
                selection,
            },
            Err(e) if e.is_claim_conflict() => no_context(NoContextReason::ClaimConflict),
            Err(e) => return Err(e.into()),
        })
    }

    fn record_notes(&self, user_id: &UserId, notes: &[AuditNote], now: DateTime<Utc>) -> Result<()> {
        for note in notes {
            let (context_id, reference_id, action) = match note {
                AuditNote::ExpiredContextReferenced {
                    context_id,
                    reference_id,
                } => (context_id, reference_id, ActivityAction::ExpiredReference),
                AuditNote::ConsumedContextReferenced {
                    context_id,
                    reference_id,
                } => (context_id, reference_id, ActivityAction::ConsumedReference),
            };
            let _ = self.store.record_activity(
                context_id,
                user_id,
                action,
                Some(&json!({ "referenceId": reference_id })),
                now,
            )?;
        }
        Ok(())
    }
}

fn no_context(reason: NoContextReason) -> Resolution {
    Resolution::NoContext { reason }
}

/// Map a lost race on a superseded clarification or a listed choice to `None`.
fn conflict_as_none(result: Result<Clarify>) -> Result<Option<Clarify>> {
    match result {
        Ok(c) => Ok(Some(c)),
        Err(CorrelationError::Store(e)) if e.is_claim_conflict() => Ok(None),
        Err(e) => Err(e),
    }
}

fn clarify_resolution(clarify: Clarify) -> Resolution {
    match clarify {
        Clarify::Issued { context, artifact } => Resolution::Clarification {
            artifact,
            disambiguation_context: context,
        },
        Clarify::Exhausted => no_context(NoContextReason::ClarificationExhausted),
        Clarify::Empty | Clarify::Single(_) => no_context(NoContextReason::NothingMatched),
    }
}

fn log_resolution(user_id: &UserId, resolution: &Resolution) {
    match resolution {
        Resolution::Claimed { context, stage, .. } => info!(
            %user_id,
            context_id = %context.id,
            reference_id = %context.reference_id,
            %stage,
            "reply correlated"
        ),
        Resolution::Clarification { artifact, .. } => info!(
            %user_id,
            reference_id = %artifact.new_reference_id,
            choices = artifact.candidates.len(),
            "clarification issued"
        ),
        Resolution::NoContext { reason } => info!(%user_id, ?reason, "no context"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Async front door: resolve on the blocking pool, then hand off.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mailback_core::{ContextId, ContextType, InboundDocument, ReferenceId, TaskHandoff};
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::CorrelationEngine;
use crate::errors::{CorrelationError, Result};
use crate::handlers::{ClarificationRenderer, HandlerRegistry};
use crate::outcome::{MatchStage, NoContextReason, Resolution};

/// What happened to one processed document.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// A context was claimed and its handler accepted the handoff.
    #[serde(rename_all = "camelCase")]
    Dispatched {
        /// The claimed context.
        context_id: ContextId,
        /// Its reference code.
        reference_id: ReferenceId,
        /// Type that selected the handler.
        context_type: ContextType,
        /// Stage that found it.
        stage: MatchStage,
    },
    /// A clarification was issued and rendered.
    #[serde(rename_all = "camelCase")]
    ClarificationSent {
        /// Code printed on the clarification form.
        reference_id: ReferenceId,
        /// The backing disambiguation context.
        disambiguation_context_id: ContextId,
        /// Number of listed choices.
        choices: usize,
    },
    /// No context applies; the caller treats the reply as new.
    Unmatched {
        /// Why.
        reason: NoContextReason,
    },
}

/// Correlates documents and dispatches the result to collaborators.
pub struct CorrelationService {
    engine: Arc<CorrelationEngine>,
    handlers: HandlerRegistry,
    renderer: Arc<dyn ClarificationRenderer>,
}

impl CorrelationService {
    /// Create a service. Fails if any domain context type has no handler.
    pub fn new(
        engine: Arc<CorrelationEngine>,
        handlers: HandlerRegistry,
        renderer: Arc<dyn ClarificationRenderer>,
    ) -> Result<Self> {
        if let Some(&missing) = handlers.missing().first() {
            return Err(CorrelationError::MissingHandler(missing));
        }
        Ok(Self {
            engine,
            handlers,
            renderer,
        })
    }

    /// The engine behind this service.
    pub fn engine(&self) -> &Arc<CorrelationEngine> {
        &self.engine
    }

    /// Process `doc` now.
    pub async fn process(&self, doc: InboundDocument) -> Result<ProcessOutcome> {
        self.process_at(doc, Utc::now()).await
    }

    /// Process `doc` as of `now`.
    ///
    /// The claim is committed before the handler runs. A handler error is
    /// returned to the caller; the context stays consumed.
    pub async fn process_at(
        &self,
        doc: InboundDocument,
        now: DateTime<Utc>,
    ) -> Result<ProcessOutcome> {
        let engine = Arc::clone(&self.engine);
        let document = doc.clone();
        let resolution =
            tokio::task::spawn_blocking(move || engine.resolve(&document, now)).await??;

        match resolution {
            Resolution::Claimed {
                context,
                stage,
                selection,
            } => {
                let context_type = context.context_type;
                let handler = self
                    .handlers
                    .get(context_type)
                    .ok_or(CorrelationError::MissingHandler(context_type))?;
                let outcome = ProcessOutcome::Dispatched {
                    context_id: context.id.clone(),
                    reference_id: context.reference_id.clone(),
                    context_type,
                    stage,
                };
                let handoff = TaskHandoff {
                    context_id: context.id,
                    reference_id: context.reference_id,
                    context_type,
                    context_data: context.context_data,
                    selection,
                    document: doc,
                };
                if let Err(e) = handler.handle(handoff).await {
                    warn!(%context_type, error = %e, "task handler failed after claim");
                    return Err(e);
                }
                debug!(%context_type, "handoff dispatched");
                Ok(outcome)
            }
            Resolution::Clarification {
                artifact,
                disambiguation_context,
            } => {
                let outcome = ProcessOutcome::ClarificationSent {
                    reference_id: artifact.new_reference_id.clone(),
                    disambiguation_context_id: disambiguation_context.id,
                    choices: artifact.candidates.len(),
                };
                self.renderer.render(artifact).await?;
                Ok(outcome)
            }
            Resolution::NoContext { reason } => Ok(ProcessOutcome::Unmatched { reason }),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

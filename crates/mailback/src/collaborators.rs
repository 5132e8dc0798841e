//! Collaborators that print to stdout, for running the engine from a shell.

use async_trait::async_trait;
use mailback_core::{ClarificationArtifact, TaskHandoff};
use mailback_correlate::{ClarificationRenderer, CorrelationError, TaskHandler};

/// Logs each handoff and prints it as one JSON line.
pub struct PrintHandler;

#[async_trait]
impl TaskHandler for PrintHandler {
    async fn handle(&self, handoff: TaskHandoff) -> mailback_correlate::Result<()> {
        tracing::info!(
            context_id = %handoff.context_id,
            reference_id = %handoff.reference_id,
            context_type = %handoff.context_type,
            "handing off"
        );
        let line = serde_json::to_string(&handoff)
            .map_err(|e| CorrelationError::handler(handoff.context_type, e.to_string()))?;
        println!("{line}");
        Ok(())
    }
}

/// Prints each clarification artifact as one JSON line.
pub struct PrintRenderer;

#[async_trait]
impl ClarificationRenderer for PrintRenderer {
    async fn render(&self, artifact: ClarificationArtifact) -> mailback_correlate::Result<()> {
        let line = serde_json::to_string(&artifact)
            .map_err(|e| CorrelationError::Renderer(e.to_string()))?;
        println!("{line}");
        Ok(())
    }
}

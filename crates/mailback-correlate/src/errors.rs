//! Error types for the correlation engine.
//!
//! Matching outcomes (not found, ambiguous, expired reference, lost claim)
//! are values, not errors. [`CorrelationError`] covers infrastructure and
//! collaborator failures only.

use mailback_core::ContextType;
use mailback_store::ContextStoreError;
use thiserror::Error;

/// Errors that can occur while correlating or dispatching a reply.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// Context store failure.
    #[error(transparent)]
    Store(#[from] ContextStoreError),

    /// No task handler registered for a domain context type.
    #[error("no task handler registered for context type {0}")]
    MissingHandler(ContextType),

    /// A task handler rejected the handoff.
    #[error("task handler for {context_type} failed: {message}")]
    Handler {
        /// Type of the context being handed off.
        context_type: ContextType,
        /// Handler-supplied reason.
        message: String,
    },

    /// The rendering collaborator rejected a clarification.
    #[error("clarification rendering failed: {0}")]
    Renderer(String),

    /// The blocking resolution task panicked or was cancelled.
    #[error("resolution task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CorrelationError {
    /// Build a [`CorrelationError::Handler`].
    pub fn handler(context_type: ContextType, message: impl Into<String>) -> Self {
        Self::Handler {
            context_type,
            message: message.into(),
        }
    }
}

/// Convenience type alias for correlation results.
pub type Result<T> = std::result::Result<T, CorrelationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use mailback_core::{ContextId, ContextStatus};

    #[test]
    fn store_errors_pass_through() {
        let err: CorrelationError = ContextStoreError::ClaimConflict {
            context_id: ContextId::from("ctx_1"),
            expected: ContextStatus::Active,
        }
        .into();
        assert_eq!(err.to_string(), "claim conflict on ctx_1: expected status active");
    }

    #[test]
    fn handler_error_display() {
        let err = CorrelationError::handler(ContextType::Shopping, "cart is empty");
        assert_eq!(
            err.to_string(),
            "task handler for shopping failed: cart is empty"
        );
    }

    #[test]
    fn missing_handler_display() {
        let err = CorrelationError::MissingHandler(ContextType::Appointment);
        assert!(err.to_string().contains("appointment"));
    }
}

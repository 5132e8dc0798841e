//! Downstream collaborators.
//!
//! A claimed context is handed to the [`TaskHandler`] registered for its
//! type. Clarifications go to a single [`ClarificationRenderer`], which is
//! responsible for printing or mailing the form.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use mailback_core::{ClarificationArtifact, ContextType, TaskHandoff};

use crate::errors::Result;

/// Resumes an interaction once its reply has been correlated.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Act on a claimed context.
    async fn handle(&self, handoff: TaskHandoff) -> Result<()>;
}

/// Produces the outbound clarification form.
#[async_trait]
pub trait ClarificationRenderer: Send + Sync {
    /// Render and send a clarification artifact.
    async fn render(&self, artifact: ClarificationArtifact) -> Result<()>;
}

/// Domain context types that must have a handler.
pub const HANDLED_TYPES: [ContextType; 4] = [
    ContextType::Email,
    ContextType::Shopping,
    ContextType::Appointment,
    ContextType::Inquiry,
];

/// Task handlers keyed by context type.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ContextType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `context_type`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, context_type: ContextType, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(context_type, handler);
        self
    }

    /// Register `handler` for `context_type`, replacing any previous one.
    pub fn register(&mut self, context_type: ContextType, handler: Arc<dyn TaskHandler>) {
        let _ = self.handlers.insert(context_type, handler);
    }

    /// Register one handler for every domain type.
    #[must_use]
    pub fn uniform(handler: Arc<dyn TaskHandler>) -> Self {
        HANDLED_TYPES
            .into_iter()
            .fold(Self::new(), |reg, t| reg.with(t, Arc::clone(&handler)))
    }

    /// The handler for `context_type`.
    pub fn get(&self, context_type: ContextType) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(&context_type)
    }

    /// Domain types with no handler.
    pub fn missing(&self) -> Vec<ContextType> {
        HANDLED_TYPES
            .into_iter()
            .filter(|t| !self.handlers.contains_key(t))
            .collect()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.handlers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl TaskHandler for Noop {
        async fn handle(&self, _handoff: TaskHandoff) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn empty_registry_misses_every_domain_type() {
        assert_eq!(HandlerRegistry::new().missing(), HANDLED_TYPES.to_vec());
    }

    #[test]
    fn uniform_registry_is_complete() {
        let registry = HandlerRegistry::uniform(Arc::new(Noop));
        assert!(registry.missing().is_empty());
        assert!(registry.get(ContextType::Inquiry).is_some());
        assert!(registry.get(ContextType::Disambiguation).is_none());
    }

    #[test]
    fn partial_registry_reports_gaps() {
        let registry = HandlerRegistry::new()
            .with(ContextType::Email, Arc::new(Noop))
            .with(ContextType::Shopping, Arc::new(Noop));
        assert_eq!(
            registry.missing(),
            vec![ContextType::Appointment, ContextType::Inquiry]
        );
        assert_eq!(format!("{registry:?}"), r#"HandlerRegistry { types: ["email", "shopping"] }"#);
    }
}

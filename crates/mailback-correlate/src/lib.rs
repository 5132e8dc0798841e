//! # mailback-correlate
//!
//! Matches scanned paper replies to the conversation contexts they answer.
//!
//! - **Matchers**: explicit reference code (exact, then bounded fuzzy),
//!   reply-form fingerprint, and recency fallback, run in that order
//! - **Disambiguator**: issues a clarification form instead of guessing
//! - **Lifecycle**: claim with one retry, periodic expiry sweep
//! - **Engine**: [`CorrelationEngine::evaluate`] (pure) and
//!   [`CorrelationEngine::resolve`] (claims or clarifies)
//! - **Service**: async dispatch to per-type task handlers and the renderer

#![deny(unsafe_code)]

pub mod disambiguator;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod matchers;
pub mod outcome;
pub mod service;

pub use disambiguator::{Clarify, Disambiguator, read_choice};
pub use engine::CorrelationEngine;
pub use errors::{CorrelationError, Result};
pub use handlers::{ClarificationRenderer, HANDLED_TYPES, HandlerRegistry, TaskHandler};
pub use lifecycle::LifecycleManager;
pub use matchers::{Matcher, ReferenceMatcher, TemplateMatcher, TemporalMatcher};
pub use outcome::{
    AuditNote, Evaluation, MatchOutcome, MatchStage, NoContextReason, Resolution, ScoredCandidate,
};
pub use service::{CorrelationService, ProcessOutcome};

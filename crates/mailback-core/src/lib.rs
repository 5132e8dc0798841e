//! # mailback-core
//!
//! Foundation types, branded IDs, and utilities for mailback.
//!
//! This crate provides the shared vocabulary that all other mailback crates depend on:
//!
//! - **Branded IDs**: `ContextId`, `UserId` as newtypes for type safety
//! - **Contexts**: `ConversationContext` with its `ContextType`, `ContextStatus`,
//!   and the tagged `ContextData` payload
//! - **Reference codes**: `ReferenceId` and the `ReferenceGrammar` that finds,
//!   validates, and normalizes them in OCR text
//! - **Extraction**: `InboundDocument` and `Annotation` as delivered by the vision interpreter
//! - **Handoff**: `TaskHandoff` and `ClarificationArtifact` for downstream collaborators
//! - **Errors**: `CoreError` via `thiserror`
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod constants;
pub mod context;
pub mod errors;
pub mod extraction;
pub mod handoff;
pub mod ids;
pub mod logging;
pub mod reference;
pub mod time;

pub use context::{
    ContextData, ContextStatus, ContextType, ConversationContext, DisambiguationChoice,
    DisambiguationPayload, NewContext, ReplyFamily, ReplyTemplate, TemplateZone, ZoneKind,
};
pub use errors::{CoreError, Result};
pub use extraction::{Annotation, AnnotationKind, BoundingBox, InboundDocument};
pub use handoff::{ClarificationArtifact, ClarificationCandidate, Selection, TaskHandoff};
pub use ids::{ContextId, UserId};
pub use reference::{ReferenceGrammar, ReferenceId};

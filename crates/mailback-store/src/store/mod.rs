//! High-level `ContextStore` API.
//!
//! The [`ContextStore`] provides a transactional, user-scoped API built on
//! top of the repository layer. All write operations are atomic: they execute
//! within a single `SQLite` transaction, so callers never see partial state.

mod context_store;

pub use context_store::*;

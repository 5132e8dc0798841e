//! Error types for the context store.
//!
//! [`ContextStoreError`] is returned by every store operation. A lost claim
//! race is reported as [`ContextStoreError::ClaimConflict`] so callers can
//! distinguish it from infrastructure failures and retry elsewhere.

use mailback_core::{ContextId, ContextStatus};
use thiserror::Error;

/// Errors that can occur during context store operations.
#[derive(Debug, Error)]
pub enum ContextStoreError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// Requested context was not found.
    #[error("context not found: {0}")]
    ContextNotFound(String),

    /// The context was no longer in the expected status when claimed.
    #[error("claim conflict on {context_id}: expected status {expected}")]
    ClaimConflict {
        /// The contested context.
        context_id: ContextId,
        /// Status the caller expected to transition from.
        expected: ContextStatus,
    },

    /// Invalid operation on the store.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A persisted value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl ContextStoreError {
    /// Whether this is a lost claim race.
    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, Self::ClaimConflict { .. })
    }
}

/// Convenience type alias for context store results.
pub type Result<T> = std::result::Result<T, ContextStoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

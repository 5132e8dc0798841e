//! Error types for the shared vocabulary.
//!
//! [`CoreError`] covers parse failures of values that cross the persistence
//! boundary as strings (statuses, types, reference codes, timestamps).

use thiserror::Error;

/// Errors raised while parsing core values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Text is not a syntactically valid reference code.
    #[error("invalid reference code: {0}")]
    InvalidReference(String),

    /// Unknown context type discriminator.
    #[error("unknown context type: {0}")]
    UnknownContextType(String),

    /// Unknown context status.
    #[error("unknown context status: {0}")]
    UnknownStatus(String),

    /// Timestamp is not RFC 3339.
    #[error("invalid timestamp {value:?}: {message}")]
    InvalidTimestamp {
        /// The rejected value.
        value: String,
        /// Parser message.
        message: String,
    },

    /// A reference grammar parameter is out of range.
    #[error("invalid reference grammar: {0}")]
    InvalidGrammar(String),
}

/// Convenience type alias for core results.
pub type Result<T> = std::result::Result<T, CoreError>;

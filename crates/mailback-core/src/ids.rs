//! Branded ID newtypes for type safety.
//!
//! Every entity in mailback has a distinct ID type implemented as a newtype
//! wrapper around `String`. This prevents accidentally passing a user ID where
//! a context ID is expected.
//!
//! System-generated IDs are UUID v7 (time-ordered) generated via
//! [`uuid::Uuid::now_v7`] with an entity prefix. Externally-owned IDs (users)
//! are carried verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Unique identifier for a persisted conversation context.
    ContextId
}

branded_id! {
    /// Identifier of the user owning a context. Supplied by the caller.
    UserId
}

impl ContextId {
    /// Create a new random ID (`ctx_` + UUID v7, time-ordered).
    #[must_use]
    pub fn new() -> Self {
        Self(format!("ctx_{}", Uuid::now_v7()))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

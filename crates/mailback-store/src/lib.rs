//! # mailback-store
//!
//! Durable context store with `SQLite` backend for mailback.
//!
//! - **Context store**: user-scoped creation, lookup by reference or recency,
//!   atomic compare-and-set claim, clarification issue, and expiry sweep
//! - **`SQLite` backend**: `rusqlite` facade with repository pattern (context,
//!   reference sequence, activity log)
//! - **Migrations**: Version-tracked SQL schema evolution
//! - **Activity log**: append-only record of every lifecycle transition and lost claim

#![deny(unsafe_code)]

pub mod errors;
pub mod sqlite;
pub mod store;
pub mod types;

pub use errors::{ContextStoreError, Result};
pub use sqlite::connection::{ConnectionConfig, ConnectionPool};
pub use store::ContextStore;
pub use types::{ActivityAction, ActivityEntry, ListedChoice, NewDisambiguation};

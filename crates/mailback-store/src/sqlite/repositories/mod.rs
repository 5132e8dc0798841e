//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`
//! parameter, so every operation is a function of (connection, input) and
//! composes freely inside a caller's transaction.

pub mod activity;
pub mod context;
pub mod sequence;

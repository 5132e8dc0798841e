//! Public store types that are not part of the shared vocabulary.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use mailback_core::{ContextId, ContextStatus, DisambiguationChoice, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ContextStoreError;

/// Kind of entry in the context activity log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    /// Context persisted.
    Created,
    /// Context consumed by a resolving request.
    Claimed,
    /// A claim attempt lost the race.
    ClaimConflict,
    /// Context listed on a clarification form.
    AwaitingDisambiguation,
    /// Clarification context issued.
    DisambiguationIssued,
    /// Context moved to expired by the sweep.
    Expired,
    /// An inbound reply quoted the code of an expired context.
    ExpiredReference,
    /// An inbound reply quoted the code of an already consumed context.
    ConsumedReference,
}

impl ActivityAction {
    /// Every action.
    pub const ALL: [Self; 8] = [
        Self::Created,
        Self::Claimed,
        Self::ClaimConflict,
        Self::AwaitingDisambiguation,
        Self::DisambiguationIssued,
        Self::Expired,
        Self::ExpiredReference,
        Self::ConsumedReference,
    ];

    /// Persisted string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Claimed => "claimed",
            Self::ClaimConflict => "claim_conflict",
            Self::AwaitingDisambiguation => "awaiting_disambiguation",
            Self::DisambiguationIssued => "disambiguation_issued",
            Self::Expired => "expired",
            Self::ExpiredReference => "expired_reference",
            Self::ConsumedReference => "consumed_reference",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = ContextStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ContextStoreError::Corrupt(format!("unknown activity action: {s}")))
    }
}

/// One entry of the activity log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    /// Monotonic row ID.
    pub id: i64,
    /// Context the entry belongs to.
    pub context_id: ContextId,
    /// Owning user.
    pub user_id: UserId,
    /// What happened.
    pub action: ActivityAction,
    /// Structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    /// When it happened.
    pub created_at: DateTime<Utc>,
}

/// A context to list on a clarification, with the status it was read in.
#[derive(Clone, Debug, PartialEq)]
pub struct ListedChoice {
    /// Printed choice.
    pub choice: DisambiguationChoice,
    /// Status the listed context must still hold when the clarification is issued.
    pub expected: ContextStatus,
}

/// Input for persisting a clarification round-trip.
#[derive(Clone, Debug)]
pub struct NewDisambiguation {
    /// Owner of every listed context.
    pub user_id: UserId,
    /// Enumerated choices, in printed order.
    pub choices: Vec<ListedChoice>,
    /// Matcher stage whose ambiguity produced the clarification.
    pub origin_stage: String,
    /// Clarification round, starting at 1.
    pub round: u32,
    /// Earlier clarifications this one replaces; consumed in the same transaction.
    pub supersedes: Vec<ContextId>,
    /// Time to live of the clarification context.
    pub ttl: Duration,
}

//! Database row types for mapping between `SQLite` rows and Rust structs.
//!
//! These represent the raw database row shape. Conversion to the public
//! types ([`ConversationContext`], [`ActivityEntry`]) happens here so the
//! repositories stay string-in, string-out.

use mailback_core::time::parse_timestamp;
use mailback_core::{
    ContextData, ContextId, ContextStatus, ContextType, ConversationContext, ReferenceId,
    ReplyTemplate, UserId,
};
use serde::{Deserialize, Serialize};

use crate::errors::{ContextStoreError, Result};
use crate::types::{ActivityAction, ActivityEntry};

/// Raw context row from the `contexts` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextRow {
    /// Context ID.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Reference code.
    pub reference_id: String,
    /// Context type discriminator.
    pub context_type: String,
    /// Untagged payload JSON.
    pub context_data: String,
    /// Descriptor.
    pub summary: Option<String>,
    /// Reply template JSON.
    pub template: Option<String>,
    /// Lifecycle status.
    pub status: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Last mutation timestamp.
    pub updated_at: String,
    /// Expiry timestamp.
    pub expires_at: String,
}

impl ContextRow {
    /// Decode into the public context type.
    pub fn into_context(self) -> Result<ConversationContext> {
        let corrupt = |e: &dyn std::fmt::Display| {
            ContextStoreError::Corrupt(format!("context {}: {e}", self.id))
        };

        let context_type: ContextType = self.context_type.parse().map_err(|e| corrupt(&e))?;
        let status: ContextStatus = self.status.parse().map_err(|e| corrupt(&e))?;
        let payload = serde_json::from_str(&self.context_data).map_err(|e| corrupt(&e))?;
        let context_data = ContextData::from_parts(context_type, payload).map_err(|e| corrupt(&e))?;
        let template = self
            .template
            .as_deref()
            .map(serde_json::from_str::<ReplyTemplate>)
            .transpose()
            .map_err(|e| corrupt(&e))?;
        let created_at = parse_timestamp(&self.created_at).map_err(|e| corrupt(&e))?;
        let updated_at = parse_timestamp(&self.updated_at).map_err(|e| corrupt(&e))?;
        let expires_at = parse_timestamp(&self.expires_at).map_err(|e| corrupt(&e))?;

        Ok(ConversationContext {
            id: ContextId::from_string(self.id),
            user_id: UserId::from_string(self.user_id),
            reference_id: ReferenceId::from_canonical(self.reference_id),
            context_type,
            context_data,
            summary: self.summary,
            template,
            status,
            created_at,
            updated_at,
            expires_at,
        })
    }
}

/// Raw activity row from the `context_activity` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActivityRow {
    /// Row ID.
    pub id: i64,
    /// Context the entry belongs to.
    pub context_id: String,
    /// Owning user.
    pub user_id: String,
    /// Action name.
    pub action: String,
    /// Optional JSON detail.
    pub detail: Option<String>,
    /// Timestamp.
    pub created_at: String,
}

impl ActivityRow {
    /// Decode into the public activity type.
    pub fn into_entry(self) -> Result<ActivityEntry> {
        let action: ActivityAction = self
            .action
            .parse()
            .map_err(|e| ContextStoreError::Corrupt(format!("activity {}: {e}", self.id)))?;
        let detail = self.detail.as_deref().map(serde_json::from_str).transpose()?;
        let created_at = parse_timestamp(&self.created_at)
            .map_err(|e| ContextStoreError::Corrupt(format!("activity {}: {e}", self.id)))?;
        Ok(ActivityEntry {
            id: self.id,
            context_id: ContextId::from_string(self.context_id),
            user_id: UserId::from_string(self.user_id),
            action,
            detail,
            created_at,
        })
    }
}

//! Conversation contexts: the persisted state of an outstanding interaction.
//!
//! A [`ConversationContext`] is created whenever an outbound artifact that
//! expects a physical reply is generated. It is owned by exactly one user,
//! carries a unique reference code, and moves through the [`ContextStatus`]
//! state machine until it is consumed or expires.
//!
//! The domain payload is a [`ContextData`] tagged union keyed by
//! [`ContextType`]. The correlation engine never looks inside the domain
//! variants; only the `Disambiguation` variant, which the engine itself
//! produces, is decoded outside the downstream handlers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::CoreError;
use crate::extraction::BoundingBox;
use crate::ids::{ContextId, UserId};
use crate::reference::ReferenceId;

// ─────────────────────────────────────────────────────────────────────────────
// ContextType
// ─────────────────────────────────────────────────────────────────────────────

/// Discriminator of the conversation domain a context belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    /// Reply to an outbound email.
    Email,
    /// Product or option choice for a shopping request.
    Shopping,
    /// Slot choice for a scheduling request.
    Appointment,
    /// Follow-up to a question-and-answer exchange.
    Inquiry,
    /// Clarification round-trip issued by the engine itself.
    Disambiguation,
}

impl ContextType {
    /// Every context type, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Email,
        Self::Shopping,
        Self::Appointment,
        Self::Inquiry,
        Self::Disambiguation,
    ];

    /// Persisted string form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Shopping => "shopping",
            Self::Appointment => "appointment",
            Self::Inquiry => "inquiry",
            Self::Disambiguation => "disambiguation",
        }
    }

    /// Reply-form family that outbound artifacts of this type are printed with.
    pub fn reply_family(self) -> ReplyFamily {
        match self {
            Self::Shopping | Self::Disambiguation => ReplyFamily::OptionSelection,
            Self::Appointment => ReplyFamily::SlotSelection,
            Self::Email | Self::Inquiry => ReplyFamily::FreeText,
        }
    }

    /// Short human label used in generated descriptors.
    pub fn label(self) -> &'static str {
        match self {
            Self::Email => "Email reply",
            Self::Shopping => "Shopping order",
            Self::Appointment => "Appointment booking",
            Self::Inquiry => "Question",
            Self::Disambiguation => "Clarification",
        }
    }
}

impl fmt::Display for ContextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::UnknownContextType(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ContextStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle status of a context.
///
/// ```text
/// Active ──► Consumed
///   │  └───► Expired
///   └──► AwaitingDisambiguation ──► Consumed | Expired
/// ```
///
/// No transition ever returns to `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStatus {
    /// Waiting for a reply.
    Active,
    /// A clarification listing this context has been sent.
    AwaitingDisambiguation,
    /// Claimed by exactly one resolving request.
    Consumed,
    /// Past its TTL.
    Expired,
}

impl ContextStatus {
    /// Persisted string form.
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::AwaitingDisambiguation => "awaiting_disambiguation",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
        }
    }

    /// Statuses that matchers may return.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Active | Self::AwaitingDisambiguation)
    }

    /// Statuses with no outgoing transition.
    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }

    /// Whether `self → next` is an edge of the lifecycle state machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Active,
                Self::AwaitingDisambiguation | Self::Consumed | Self::Expired
            ) | (Self::AwaitingDisambiguation, Self::Consumed | Self::Expired)
        )
    }
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for ContextStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "awaiting_disambiguation" => Ok(Self::AwaitingDisambiguation),
            "consumed" => Ok(Self::Consumed),
            "expired" => Ok(Self::Expired),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply templates
// ─────────────────────────────────────────────────────────────────────────────

/// Structural family of a printed reply form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFamily {
    /// Lettered options, one of which is circled or ticked.
    OptionSelection,
    /// Time or date slots, one of which is circled or ticked.
    SlotSelection,
    /// Space for a handwritten answer.
    FreeText,
}

/// What the user is expected to put inside a template zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    /// A tick box, bubble, or letter to circle.
    Selection,
    /// Lines for handwriting.
    Writing,
}

/// A region of the page where a marking is expected.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateZone {
    /// Expected marking category.
    pub kind: ZoneKind,
    /// Zone bounds in normalized page coordinates.
    pub bounding_box: BoundingBox,
}

/// Structural fingerprint of the reply form printed for a context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTemplate {
    /// Layout family.
    pub family: ReplyFamily,
    /// Number of lettered options (A, B, …) printed on the form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_count: Option<u32>,
    /// How many options the user may select.
    #[serde(default = "default_max_selections")]
    pub max_selections: u32,
    /// Regions where markings are expected.
    #[serde(default)]
    pub zones: Vec<TemplateZone>,
}

fn default_max_selections() -> u32 {
    1
}

impl ReplyTemplate {
    /// A template with no zone information.
    pub fn new(family: ReplyFamily) -> Self {
        Self {
            family,
            option_count: None,
            max_selections: 1,
            zones: Vec::new(),
        }
    }

    /// Set the number of lettered options.
    #[must_use]
    pub fn with_option_count(mut self, count: u32) -> Self {
        self.option_count = Some(count);
        self
    }

    /// Add an expected marking zone.
    #[must_use]
    pub fn with_zone(mut self, kind: ZoneKind, bounding_box: BoundingBox) -> Self {
        self.zones.push(TemplateZone { kind, bounding_box });
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ContextData
// ─────────────────────────────────────────────────────────────────────────────

/// One enumerated choice on a clarification form.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisambiguationChoice {
    /// Selection marker printed next to the choice (`A`, `B`, …).
    pub marker: String,
    /// Context the choice stands for.
    pub context_id: ContextId,
    /// Reference code of that context.
    pub reference_id: ReferenceId,
    /// Type of that context.
    pub context_type: ContextType,
    /// Human-readable descriptor shown to the user.
    pub descriptor: String,
}

/// Payload of a `disambiguation` context: the candidate set it clarifies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisambiguationPayload {
    /// Enumerated choices, in printed order.
    pub choices: Vec<DisambiguationChoice>,
    /// Matcher stage whose ambiguity produced this clarification.
    pub origin_stage: String,
    /// 1 for a first clarification, incremented each time one is re-issued.
    #[serde(default = "default_round")]
    pub round: u32,
}

fn default_round() -> u32 {
    1
}

impl DisambiguationPayload {
    /// Look up a choice by its marker (case-insensitive).
    pub fn choice_by_marker(&self, marker: &str) -> Option<&DisambiguationChoice> {
        let marker = marker.trim();
        self.choices
            .iter()
            .find(|c| c.marker.eq_ignore_ascii_case(marker))
    }

    /// Look up a choice by its 1-based position.
    pub fn choice_by_index(&self, one_based: usize) -> Option<&DisambiguationChoice> {
        one_based
            .checked_sub(1)
            .and_then(|i| self.choices.get(i))
    }

    /// Whether the given context is one of the choices.
    pub fn lists(&self, context_id: &ContextId) -> bool {
        self.choices.iter().any(|c| &c.context_id == context_id)
    }
}

/// Opaque per-domain payload, tagged by [`ContextType`].
///
/// Domain variants hold arbitrary JSON that only the owning task handler
/// interprets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ContextData {
    /// Email reply state.
    Email(Value),
    /// Shopping selection state.
    Shopping(Value),
    /// Appointment booking state.
    Appointment(Value),
    /// Inquiry state.
    Inquiry(Value),
    /// Clarification state.
    Disambiguation(DisambiguationPayload),
}

impl ContextData {
    /// The discriminator implied by this payload.
    pub fn context_type(&self) -> ContextType {
        match self {
            Self::Email(_) => ContextType::Email,
            Self::Shopping(_) => ContextType::Shopping,
            Self::Appointment(_) => ContextType::Appointment,
            Self::Inquiry(_) => ContextType::Inquiry,
            Self::Disambiguation(_) => ContextType::Disambiguation,
        }
    }

    /// The untagged payload as JSON, as persisted next to the type column.
    pub fn payload(&self) -> serde_json::Result<Value> {
        match self {
            Self::Email(v) | Self::Shopping(v) | Self::Appointment(v) | Self::Inquiry(v) => {
                Ok(v.clone())
            }
            Self::Disambiguation(p) => serde_json::to_value(p),
        }
    }

    /// Rebuild from a persisted type column and payload.
    pub fn from_parts(context_type: ContextType, payload: Value) -> serde_json::Result<Self> {
        Ok(match context_type {
            ContextType::Email => Self::Email(payload),
            ContextType::Shopping => Self::Shopping(payload),
            ContextType::Appointment => Self::Appointment(payload),
            ContextType::Inquiry => Self::Inquiry(payload),
            ContextType::Disambiguation => Self::Disambiguation(serde_json::from_value(payload)?),
        })
    }

    /// The clarification payload, if this is a `disambiguation` context.
    pub fn as_disambiguation(&self) -> Option<&DisambiguationPayload> {
        match self {
            Self::Disambiguation(p) => Some(p),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ConversationContext
// ─────────────────────────────────────────────────────────────────────────────

/// A persisted outstanding interaction awaiting a physical reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    /// System-generated identifier.
    pub id: ContextId,
    /// Owning user. Contexts are never visible across users.
    pub user_id: UserId,
    /// Unique, immutable correlation code.
    pub reference_id: ReferenceId,
    /// Domain discriminator, always equal to `context_data.context_type()`.
    pub context_type: ContextType,
    /// Opaque domain payload.
    pub context_data: ContextData,
    /// Short human-readable description of the outbound artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Fingerprint of the printed reply form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ReplyTemplate>,
    /// Lifecycle status.
    pub status: ContextStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// Expiry time; always after `created_at`.
    pub expires_at: DateTime<Utc>,
}

impl ConversationContext {
    /// Whether a matcher may return this context at `now`.
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.expires_at > now
    }

    /// Whether the TTL has elapsed at `now`, regardless of sweep state.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == ContextStatus::Expired || self.expires_at <= now
    }

    /// Human-readable descriptor for clarification forms.
    pub fn descriptor(&self) -> String {
        match self.summary.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => format!(
                "{} from {} ({})",
                self.context_type.label(),
                self.created_at.format("%b %-d"),
                self.reference_id
            ),
        }
    }
}

/// Input for creating a context on the outbound side.
#[derive(Clone, Debug)]
pub struct NewContext {
    /// Owning user.
    pub user_id: UserId,
    /// Domain payload; its variant sets the context type.
    pub context_data: ContextData,
    /// Optional descriptor.
    pub summary: Option<String>,
    /// Optional reply-form fingerprint.
    pub template: Option<ReplyTemplate>,
    /// Time to live from creation.
    pub ttl: Duration,
}

impl NewContext {
    /// Minimal context input.
    pub fn new(user_id: impl Into<UserId>, context_data: ContextData, ttl: Duration) -> Self {
        Self {
            user_id: user_id.into(),
            context_data,
            summary: None,
            template: None,
            ttl,
        }
    }

    /// Attach a descriptor.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Attach a reply-form fingerprint.
    #[must_use]
    pub fn with_template(mut self, template: ReplyTemplate) -> Self {
        self.template = Some(template);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

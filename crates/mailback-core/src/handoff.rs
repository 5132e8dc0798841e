//! Payloads handed to downstream collaborators.
//!
//! A resolved, claimed context goes to the task handler for its type as a
//! [`TaskHandoff`]. An ambiguous match goes to the rendering collaborator as
//! a [`ClarificationArtifact`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{ContextData, ContextType, ReplyFamily};
use crate::extraction::InboundDocument;
use crate::ids::{ContextId, UserId};
use crate::reference::ReferenceId;

/// What the user marked on the reply, as far as the engine can tell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Selection {
    /// Lettered options circled or ticked, in page order.
    Options(Vec<char>),
    /// Label of a marked time or date slot.
    Slot(String),
    /// The marker chosen on a clarification form that led to this context.
    Clarified(String),
}

impl Selection {
    /// Read the selection implied by the markings for a reply-form family.
    ///
    /// Free-text replies carry no selection; their handler reads the text.
    pub fn from_document(doc: &InboundDocument, family: ReplyFamily) -> Option<Self> {
        match family {
            ReplyFamily::OptionSelection => {
                let letters = doc.selected_letters();
                (!letters.is_empty()).then_some(Self::Options(letters))
            }
            ReplyFamily::SlotSelection => doc
                .annotations
                .iter()
                .filter(|a| a.kind.is_selection_mark() && a.selection_letter().is_none())
                .filter_map(|a| a.associated_text.as_deref().map(str::trim))
                .find(|t| !t.is_empty())
                .map(|t| Self::Slot(t.to_string()))
                .or_else(|| {
                    let letters = doc.selected_letters();
                    (!letters.is_empty()).then_some(Self::Options(letters))
                }),
            ReplyFamily::FreeText => None,
        }
    }
}

/// Everything a task handler needs to resume a claimed interaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskHandoff {
    /// The claimed context.
    pub context_id: ContextId,
    /// Its reference code.
    pub reference_id: ReferenceId,
    /// Domain discriminator; selects the handler.
    pub context_type: ContextType,
    /// Opaque payload for the handler.
    pub context_data: ContextData,
    /// Marked selection, when the form had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<Selection>,
    /// The inbound extraction result.
    pub document: InboundDocument,
}

/// One enumerated line on a clarification form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationCandidate {
    /// Short human-readable description.
    pub descriptor: String,
    /// Selection marker printed next to it.
    pub marker: String,
}

/// A clarification to be rendered and delivered back to the user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClarificationArtifact {
    /// Recipient.
    pub user_id: UserId,
    /// Choices in printed order.
    pub candidates: Vec<ClarificationCandidate>,
    /// Reference code of the new disambiguation context, to print on the form.
    pub new_reference_id: ReferenceId,
    /// The disambiguation context backing this form.
    pub disambiguation_context_id: ContextId,
    /// When the clarification stops being answerable.
    pub expires_at: DateTime<Utc>,
}

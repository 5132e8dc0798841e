//! Inbound extraction results supplied by the vision interpreter.
//!
//! One [`InboundDocument`] is produced per scanned page set. Coordinates in
//! [`BoundingBox`] are normalized to the page (`0.0..=1.0` on both axes,
//! origin top-left).

use serde::{Deserialize, Serialize};

use crate::context::ZoneKind;
use crate::ids::UserId;

/// Axis-aligned rectangle in normalized page coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl BoundingBox {
    /// Construct a box.
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Euclidean distance between centers.
    pub fn center_distance(&self, other: &Self) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }
}

/// Category of a detected marking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    /// Tick mark.
    Checkmark,
    /// Circled item.
    Circle,
    /// Crossed box.
    Cross,
    /// Underlined text.
    Underline,
    /// Handwritten text block.
    Handwriting,
    /// Signature.
    Signature,
    /// Highlighter stroke.
    Highlight,
    /// Anything the interpreter could not classify.
    #[serde(other)]
    Unknown,
}

impl AnnotationKind {
    /// Tick, circle, or cross: a mark that selects a printed item.
    pub fn is_selection_mark(self) -> bool {
        matches!(self, Self::Checkmark | Self::Circle | Self::Cross)
    }

    /// A mark that carries written content.
    pub fn is_writing(self) -> bool {
        matches!(self, Self::Handwriting | Self::Underline)
    }

    /// Template zone this kind of marking is expected in.
    pub fn zone_kind(self) -> Option<ZoneKind> {
        if self.is_selection_mark() {
            Some(ZoneKind::Selection)
        } else if self.is_writing() {
            Some(ZoneKind::Writing)
        } else {
            None
        }
    }
}

/// One detected marking on the page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    /// Marking category.
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    /// Where on the page the marking was found.
    pub bounding_box: BoundingBox,
    /// Text the marking is attached to (the circled letter, the handwritten words).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub associated_text: Option<String>,
    /// Interpreter confidence, `0.0..=1.0`.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Annotation {
    /// Associated text with surrounding whitespace and bracket punctuation removed.
    fn label(&self) -> Option<&str> {
        self.associated_text
            .as_deref()
            .map(|t| t.trim().trim_matches(|c: char| matches!(c, '(' | ')' | '.' | ':' | '[' | ']')))
            .filter(|t| !t.is_empty())
    }

    /// The option letter a selection mark points at (`"b)"` → `'B'`).
    pub fn selection_letter(&self) -> Option<char> {
        if !self.kind.is_selection_mark() {
            return None;
        }
        let label = self.label()?;
        let mut chars = label.chars();
        let c = chars.next()?;
        (chars.next().is_none() && c.is_ascii_alphabetic()).then(|| c.to_ascii_uppercase())
    }

    /// The 1-based option number a selection mark points at (`"2."` → `2`).
    pub fn selection_number(&self) -> Option<usize> {
        if !self.kind.is_selection_mark() {
            return None;
        }
        self.label()?.parse::<usize>().ok().filter(|n| (1..=26).contains(n))
    }

    /// Confidence clamped to `0.0..=1.0`; a non-finite confidence weighs nothing.
    pub fn weight(&self) -> f64 {
        if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// A single inbound scanned document after vision extraction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundDocument {
    /// Owner of the mailbox the document arrived in.
    pub user_id: UserId,
    /// Full OCR text of the page(s).
    #[serde(default)]
    pub extracted_text: String,
    /// Detected markings.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// Reference code the interpreter believes it read, possibly malformed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_effort_reference_id: Option<String>,
}

impl InboundDocument {
    /// A document with text only.
    pub fn new(user_id: impl Into<UserId>, extracted_text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            extracted_text: extracted_text.into(),
            annotations: Vec::new(),
            best_effort_reference_id: None,
        }
    }

    /// Add a marking.
    #[must_use]
    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    /// Set the interpreter's reference guess.
    #[must_use]
    pub fn with_reference_hint(mut self, hint: impl Into<String>) -> Self {
        self.best_effort_reference_id = Some(hint.into());
        self
    }

    /// Distinct selected option letters, in page order.
    pub fn selected_letters(&self) -> Vec<char> {
        let mut out = Vec::new();
        for letter in self.annotations.iter().filter_map(Annotation::selection_letter) {
            if !out.contains(&letter) {
                out.push(letter);
            }
        }
        out
    }

    /// Distinct selected option numbers, in page order.
    pub fn selected_numbers(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for n in self.annotations.iter().filter_map(Annotation::selection_number) {
            if !out.contains(&n) {
                out.push(n);
            }
        }
        out
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Template fingerprint matcher: structural similarity of the markings on a
//! reply to the reply forms printed for the user's open contexts.
//!
//! The markings first vote on a [`ReplyFamily`]. Only contexts whose type
//! prints that family are scored, so a circled option letter can never be
//! matched to an open email reply. Each candidate is then scored on three
//! components, each in `0.0..=1.0`:
//!
//! | component | weight | measures |
//! |---|---|---|
//! | count fit | 0.4 | number of selection marks vs. the form's allowed selections |
//! | letter validity | 0.3 | selected letters within the form's option count |
//! | zone proximity | 0.3 | marks near the form's expected zones |
//!
//! Components a context's template cannot inform score a neutral 0.5.

use std::cmp::Ordering;
use std::sync::LazyLock;

use mailback_core::{
    Annotation, ConversationContext, InboundDocument, ReplyFamily, ReplyTemplate, ZoneKind,
};
use mailback_settings::TemplateSettings;
use regex::Regex;
use tracing::debug;

use crate::errors::Result;
use crate::matchers::{MatchInput, Matcher};
use crate::outcome::{AuditNote, MatchOutcome, MatchStage, ScoredCandidate};

const COUNT_WEIGHT: f64 = 0.4;
const LETTER_WEIGHT: f64 = 0.3;
const ZONE_WEIGHT: f64 = 0.3;
const NEUTRAL: f64 = 0.5;

/// Minimum letters in a handwriting block for it to count as a written answer.
const MIN_WRITTEN_LETTERS: usize = 3;

/// Time, weekday, or day/month label of a scheduling slot.
static SLOT_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d{1,2}:\d{2}|\d{1,2}\s?(am|pm)|(mon|tue|wed|thu|fri|sat|sun)[a-z]*|\d{1,2}/\d{1,2})\b")
        .unwrap()
});

/// Reply-form family the markings resemble, by confidence-weighted vote.
///
/// `None` when nothing votes or the top two families tie.
pub fn detect_family(doc: &InboundDocument) -> Option<ReplyFamily> {
    let mut votes = [
        (ReplyFamily::OptionSelection, 0.0_f64),
        (ReplyFamily::SlotSelection, 0.0),
        (ReplyFamily::FreeText, 0.0),
    ];
    for mark in &doc.annotations {
        let Some(family) = vote(mark) else { continue };
        if let Some(slot) = votes.iter_mut().find(|(f, _)| *f == family) {
            slot.1 += mark.weight();
        }
    }

    votes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    let (top, top_weight) = votes[0];
    if top_weight <= 0.0 || (top_weight - votes[1].1).abs() < f64::EPSILON {
        return None;
    }
    Some(top)
}

fn vote(mark: &Annotation) -> Option<ReplyFamily> {
    if mark.kind.is_selection_mark() {
        if mark.selection_letter().is_some() || mark.selection_number().is_some() {
            return Some(ReplyFamily::OptionSelection);
        }
        let text = mark.associated_text.as_deref()?;
        return SLOT_LABEL
            .is_match(text)
            .then_some(ReplyFamily::SlotSelection);
    }
    if mark.kind.is_writing() {
        let letters = mark
            .associated_text
            .as_deref()
            .map_or(0, |t| t.chars().filter(|c| c.is_alphabetic()).count());
        return (letters >= MIN_WRITTEN_LETTERS).then_some(ReplyFamily::FreeText);
    }
    None
}

/// Structural similarity matcher.
pub struct TemplateMatcher {
    settings: TemplateSettings,
}

impl TemplateMatcher {
    /// Create a matcher with the given thresholds.
    pub fn new(settings: TemplateSettings) -> Self {
        Self { settings }
    }

    /// Score one candidate against the markings for `family`.
    pub fn score(&self, doc: &InboundDocument, family: ReplyFamily, ctx: &ConversationContext) -> f64 {
        let template = ctx.template.as_ref();
        COUNT_WEIGHT * count_fit(doc, family, template)
            + LETTER_WEIGHT * letter_validity(doc, template)
            + ZONE_WEIGHT * self.zone_proximity(doc, template)
    }

    fn zone_proximity(&self, doc: &InboundDocument, template: Option<&ReplyTemplate>) -> f64 {
        let Some(template) = template.filter(|t| !t.zones.is_empty()) else {
            return NEUTRAL;
        };
        let radius = self.settings.zone_radius.max(f64::EPSILON);
        let per_mark: Vec<f64> = doc
            .annotations
            .iter()
            .filter_map(|mark| {
                let kind = mark.kind.zone_kind()?;
                let nearest = template
                    .zones
                    .iter()
                    .filter(|z| z.kind == kind)
                    .map(|z| z.bounding_box.center_distance(&mark.bounding_box))
                    .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
                Some(nearest.map_or(0.0, |d| (1.0 - d / radius).max(0.0)))
            })
            .collect();
        mean(&per_mark).unwrap_or(NEUTRAL)
    }
}

fn count_fit(doc: &InboundDocument, family: ReplyFamily, template: Option<&ReplyTemplate>) -> f64 {
    match family {
        ReplyFamily::OptionSelection | ReplyFamily::SlotSelection => {
            let marks = doc
                .annotations
                .iter()
                .filter(|a| a.kind.zone_kind() == Some(ZoneKind::Selection))
                .count();
            let allowed = template.map_or(1, |t| t.max_selections.max(1)) as usize;
            match marks {
                0 => 0.0,
                n if n <= allowed => 1.0,
                #[allow(clippy::cast_precision_loss)]
                n => allowed as f64 / n as f64,
            }
        }
        ReplyFamily::FreeText => {
            let written = doc.annotations.iter().any(|a| a.kind.is_writing());
            if written { 1.0 } else { 0.0 }
        }
    }
}

fn letter_validity(doc: &InboundDocument, template: Option<&ReplyTemplate>) -> f64 {
    let Some(options) = template.and_then(|t| t.option_count) else {
        return NEUTRAL;
    };
    let letters = doc.selected_letters();
    if letters.is_empty() {
        return NEUTRAL;
    }
    let valid = letters
        .iter()
        .filter(|l| u32::from(**l) - u32::from('A') < options)
        .count();
    #[allow(clippy::cast_precision_loss)]
    let ratio = valid as f64 / letters.len() as f64;
    ratio
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

impl Matcher for TemplateMatcher {
    fn stage(&self) -> MatchStage {
        MatchStage::Template
    }

    fn find(&self, input: &MatchInput<'_>, _notes: &mut Vec<AuditNote>) -> Result<MatchOutcome> {
        let doc = input.document;
        let Some(family) = detect_family(doc) else {
            debug!("no reply-form family detected");
            return Ok(MatchOutcome::NotFound);
        };

        let mut ranked: Vec<ScoredCandidate> = input
            .pool
            .iter()
            .filter(|c| c.context_type.reply_family() == family)
            .map(|c| ScoredCandidate::new(c.clone(), self.score(doc, family, c)))
            .filter(|c| c.score >= self.settings.min_candidate_score)
            .collect();
        // pool order (most recent first) breaks score ties
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

        debug!(?family, candidates = ranked.len(), top = ranked.first().map(|c| c.score), "template scores");

        let min_score = self.settings.min_score;
        let Some(top) = ranked.first() else {
            return Ok(MatchOutcome::NotFound);
        };
        if ranked.len() == 1 {
            return Ok(if top.score >= min_score {
                MatchOutcome::found(ranked.remove(0))
            } else {
                MatchOutcome::NotFound
            });
        }

        let lead = top.score - ranked[1].score;
        if top.score >= min_score && lead >= self.settings.min_margin {
            let best = ranked.remove(0);
            let runners_up = ranked.into_iter().filter(|c| c.score >= min_score).collect();
            return Ok(MatchOutcome::Found { best, runners_up });
        }

        ranked.truncate(self.settings.top_k.max(2));
        Ok(MatchOutcome::Ambiguous { candidates: ranked })
    }
}

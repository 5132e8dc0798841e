//! Reference codes and the grammar that recognizes them in OCR text.
//!
//! A reference code has the canonical form `<PREFIX>-<YYYY>-<SEQ>`, e.g.
//! `MB-2026-00042`, where `SEQ` is zero-padded to a fixed width. The same
//! code is printed on the outbound artifact and is expected back, printed or
//! handwritten, anywhere on the reply.
//!
//! [`ReferenceGrammar`] provides two views of a page:
//!
//! - **Strict**: tokens that match the grammar exactly (case-insensitive),
//!   returned in canonical uppercase form.
//! - **Loose**: separator-free, confusion-normalized candidate strings used
//!   by the bounded fuzzy pass. Inside the prefix digits are read as letters
//!   (`0→O`, `1→I`, …); after it letters are read as digits (`O→0`, `I→1`, …).

use std::collections::HashSet;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, Result};

/// Characters OCR commonly emits between the parts of a code.
const SEPARATORS: &[char] = &['-', '_', '.', '/', '\u{2013}', '\u{2014}'];

/// Characters that split words before windowing.
const WORD_BREAKS: &[char] = &[':', '#', ',', ';', '(', ')', '[', ']', '"', '\''];

/// Maximum number of adjacent words joined into one loose candidate.
const MAX_WINDOW_WORDS: usize = 3;

/// A canonical reference code (uppercase, dash-separated).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(String);

impl ReferenceId {
    /// Wrap a value already known to be canonical (e.g. read back from the store).
    pub fn from_canonical(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Return the inner string as a slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Separator-free form used for edit-distance comparison.
    pub fn compact(&self) -> String {
        self.0.chars().filter(|c| *c != '-').collect()
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ReferenceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The fixed reference grammar: prefix, four-digit year, padded sequence.
#[derive(Clone, Debug)]
pub struct ReferenceGrammar {
    prefix: String,
    sequence_width: usize,
    token: Regex,
    anchored: Regex,
}

impl ReferenceGrammar {
    /// Build a grammar for `prefix` (1–4 ASCII uppercase letters) and a
    /// sequence width of 3–9 digits.
    pub fn new(prefix: &str, sequence_width: usize) -> Result<Self> {
        if prefix.is_empty() || prefix.len() > 4 || !prefix.chars().all(|c| c.is_ascii_uppercase())
        {
            return Err(CoreError::InvalidGrammar(format!(
                "prefix must be 1-4 uppercase ASCII letters, got {prefix:?}"
            )));
        }
        if !(3..=9).contains(&sequence_width) {
            return Err(CoreError::InvalidGrammar(format!(
                "sequence width must be 3-9, got {sequence_width}"
            )));
        }

        let body = format!(r"{}-\d{{4}}-\d{{{sequence_width}}}", regex::escape(prefix));
        let token = Regex::new(&format!(r"(?i)\b{body}\b"))
            .map_err(|e| CoreError::InvalidGrammar(e.to_string()))?;
        let anchored = Regex::new(&format!(r"(?i)^{body}$"))
            .map_err(|e| CoreError::InvalidGrammar(e.to_string()))?;

        Ok(Self {
            prefix: prefix.to_string(),
            sequence_width,
            token,
            anchored,
        })
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The configured sequence width.
    pub fn sequence_width(&self) -> usize {
        self.sequence_width
    }

    /// Length of a compact (separator-free) code.
    pub fn compact_len(&self) -> usize {
        self.prefix.len() + 4 + self.sequence_width
    }

    /// Render the code for a year and sequence number.
    pub fn format(&self, year: i32, sequence: u64) -> ReferenceId {
        ReferenceId(format!(
            "{}-{year:04}-{sequence:0width$}",
            self.prefix,
            width = self.sequence_width
        ))
    }

    /// Parse a complete code, tolerating surrounding whitespace and case.
    pub fn parse(&self, raw: &str) -> Result<ReferenceId> {
        let trimmed = raw.trim();
        if self.anchored.is_match(trimmed) {
            Ok(ReferenceId(trimmed.to_ascii_uppercase()))
        } else {
            Err(CoreError::InvalidReference(raw.to_string()))
        }
    }

    /// Every syntactically valid code in `text`, canonicalized, first occurrence order.
    pub fn find_all(&self, text: &str) -> Vec<ReferenceId> {
        let mut seen = HashSet::new();
        self.token
            .find_iter(text)
            .map(|m| m.as_str().to_ascii_uppercase())
            .filter(|s| seen.insert(s.clone()))
            .map(ReferenceId)
            .collect()
    }

    /// Normalize a raw fragment to the compact comparison form.
    pub fn normalize_compact(&self, raw: &str) -> String {
        let prefix_len = self.prefix.len();
        raw.chars()
            .filter(|c| !c.is_whitespace() && !SEPARATORS.contains(c))
            .map(|c| c.to_ascii_uppercase())
            .enumerate()
            .map(|(i, c)| {
                if i < prefix_len {
                    digit_as_letter(c)
                } else {
                    letter_as_digit(c)
                }
            })
            .collect()
    }

    /// Loose, normalized candidates for the fuzzy pass.
    ///
    /// Windows of up to three adjacent words are joined; a window is kept
    /// when its compact length is within `slack` of a real code's length.
    pub fn fuzzy_candidates(&self, text: &str, slack: usize) -> Vec<String> {
        let words: Vec<&str> = text
            .split(|c: char| c.is_whitespace() || WORD_BREAKS.contains(&c))
            .map(|w| w.trim_matches(|c: char| SEPARATORS.contains(&c) || c == '!' || c == '?'))
            .filter(|w| !w.is_empty())
            .collect();

        let target = self.compact_len();
        let min_len = target.saturating_sub(slack);
        let max_len = target + slack;

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for start in 0..words.len() {
            let mut joined = String::new();
            for word in words.iter().skip(start).take(MAX_WINDOW_WORDS) {
                joined.push_str(word);
                let candidate = self.normalize_compact(&joined);
                if candidate.len() > max_len {
                    break;
                }
                if candidate.len() >= min_len
                    && candidate.chars().all(|c| c.is_ascii_alphanumeric())
                    && seen.insert(candidate.clone())
                {
                    out.push(candidate);
                }
            }
        }
        out
    }
}

fn digit_as_letter(c: char) -> char {
    match c {
        '0' => 'O',
        '1' => 'I',
        '2' => 'Z',
        '5' => 'S',
        '6' => 'G',
        '8' => 'B',
        other => other,
    }
}

fn letter_as_digit(c: char) -> char {
    match c {
        'O' | 'Q' | 'D' => '0',
        'I' | 'L' | '|' | '!' => '1',
        'Z' => '2',
        'S' => '5',
        'G' => '6',
        'T' => '7',
        'B' => '8',
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

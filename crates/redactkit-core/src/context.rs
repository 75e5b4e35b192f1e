//! Context-aware matching against the built-in entity library
//!
//! Each entity kind has a base value shape, a set of clue words and a list of
//! conflicting kinds. A candidate's confidence is decided by the nearest clue
//! found in a window of text around it: its own clue raises confidence,
//! a conflicting kind's clue lowers it sharply, and with no clue at all the
//! score falls back to format validation.

use crate::inference::{DATE_REGEX, EMAIL_REGEX, STREET_SUFFIXES};
use crate::pattern::{EntityKind, Match, MatchMethod, Pattern};
use crate::validators::{
    is_plausible_birth_date, is_valid_credit_card, is_valid_email, is_valid_phone, is_valid_ssn,
};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use tracing::debug;

const OWN_CLUE_BASE: f64 = 0.9;
const OWN_CLUE_VALID_BONUS: f64 = 0.05;
const OWN_CLUE_EXTRA_BONUS: f64 = 0.02;
const OWN_CLUE_INVALID_PENALTY: f64 = 0.3;
const OWN_CLUE_CAP: f64 = 0.99;
const CONFLICT_CONFIDENCE: f64 = 0.2;
const NO_CLUE_INVALID: f64 = 0.2;
const STRUCTURED_BOOST_CAP: f64 = 0.95;

/// Plain data describing one entity kind, plus the validator used as the
/// no-clue fallback.
pub struct ContextRule {
    pub kind: EntityKind,
    pub shape: &'static str,
    pub clues: &'static [&'static str],
    pub conflicts: &'static [EntityKind],
    pub validator: fn(&str) -> bool,
    /// Confidence when no clue is present and the value validates.
    pub unclued_confidence: f64,
}

fn accept_any(_: &str) -> bool {
    true
}

fn is_name_like(value: &str) -> bool {
    value.split_whitespace().count() >= 2
        && value
            .split_whitespace()
            .all(|w| w.chars().next().map_or(false, |c| c.is_ascii_uppercase()))
}

pub static CONTEXT_RULES: &[ContextRule] = &[
    ContextRule {
        kind: EntityKind::Ssn,
        shape: r"\b\d{3}[-\s]\d{2}[-\s]\d{4}\b|\b\d{9}\b",
        clues: &["ssn", "social security", "social", "ss#", "tin", "taxpayer"],
        conflicts: &[EntityKind::Phone, EntityKind::CreditCard],
        validator: is_valid_ssn,
        unclued_confidence: 0.6,
    },
    ContextRule {
        kind: EntityKind::Email,
        shape: EMAIL_REGEX,
        clues: &["email", "e-mail", "mail", "contact", "reach"],
        conflicts: &[],
        validator: is_valid_email,
        unclued_confidence: 0.7,
    },
    ContextRule {
        kind: EntityKind::CreditCard,
        shape: r"\b(?:\d{4}[-\s]?){3}\d{1,4}\b|\b\d{4}[-\s]?\d{6}[-\s]?\d{5}\b",
        clues: &["card", "credit", "visa", "mastercard", "amex", "payment", "cc"],
        conflicts: &[EntityKind::Phone, EntityKind::Ssn],
        validator: is_valid_credit_card,
        unclued_confidence: 0.65,
    },
    ContextRule {
        kind: EntityKind::Phone,
        shape: r"(?:\+?1[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
        clues: &["phone", "tel", "telephone", "mobile", "cell", "call", "fax"],
        conflicts: &[EntityKind::Ssn, EntityKind::CreditCard],
        validator: is_valid_phone,
        unclued_confidence: 0.55,
    },
    ContextRule {
        kind: EntityKind::DateOfBirth,
        shape: DATE_REGEX,
        clues: &["dob", "birth", "born", "birthday", "birthdate"],
        conflicts: &[],
        validator: is_plausible_birth_date,
        unclued_confidence: 0.5,
    },
    ContextRule {
        kind: EntityKind::Address,
        shape: "",
        clues: &["address", "addr", "street", "residence", "lives", "located", "ship"],
        conflicts: &[EntityKind::Email],
        validator: accept_any,
        unclued_confidence: 0.6,
    },
    ContextRule {
        kind: EntityKind::PersonName,
        shape: r"\b[A-Z][a-z]+(?:\s+[A-Z]\.)?(?:\s+[A-Z][a-z]+)+\b",
        clues: &["name", "mr", "mrs", "ms", "dr", "patient", "customer", "employee", "contact"],
        conflicts: &[],
        validator: is_name_like,
        unclued_confidence: 0.35,
    },
];

static ADDRESS_SHAPE: Lazy<String> = Lazy::new(|| {
    format!(
        r"\b\d{{1,6}}\s+(?:[A-Za-z0-9.]+\s+){{0,4}}(?:{})\b\.?",
        STREET_SUFFIXES.join("|")
    )
});

static COMPILED_SHAPES: Lazy<HashMap<EntityKind, Regex>> = Lazy::new(|| {
    CONTEXT_RULES
        .iter()
        .map(|rule| {
            let shape = if rule.kind == EntityKind::Address {
                ADDRESS_SHAPE.as_str()
            } else {
                rule.shape
            };
            let regex = RegexBuilder::new(shape)
                .case_insensitive(rule.kind == EntityKind::Address)
                .build()
                .expect("built-in context shapes are valid");
            (rule.kind, regex)
        })
        .collect()
});

static RECORD_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?im)^\s*record\s+\d+\s*:\s*$").expect("record header regex is valid"));

static FIELD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*[A-Za-z][A-Za-z0-9 _\-./#]{0,40}:\s*\S").expect("field line regex is valid")
});

pub fn rule_for(kind: EntityKind) -> &'static ContextRule {
    CONTEXT_RULES
        .iter()
        .find(|rule| rule.kind == kind)
        .expect("every entity kind has a context rule")
}

/// True when the text reads as `Record N:` blocks or `field: value` lines.
pub fn is_structured_record(text: &str) -> bool {
    RECORD_HEADER.is_match(text) || FIELD_LINE.find_iter(text).take(2).count() >= 2
}

#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub window: usize,
    pub acceptance_threshold: f64,
    pub structured_threshold: f64,
    pub structured_boost: f64,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            window: 50,
            acceptance_threshold: 0.5,
            structured_threshold: 0.3,
            structured_boost: 0.2,
        }
    }
}

/// Nearest occurrence distance of any clue in the window, plus how many
/// distinct clues were seen.
#[derive(Debug, Default, Clone, Copy)]
struct ClueHit {
    distance: Option<usize>,
    distinct: usize,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Finds whole-word occurrences of `clue` in `haystack` (already lowercase).
fn clue_positions<'a>(haystack: &'a str, clue: &'a str) -> impl Iterator<Item = usize> + 'a {
    let bytes = haystack.as_bytes();
    haystack.match_indices(clue).filter_map(move |(pos, _)| {
        let before_ok = pos == 0 || !is_word_byte(bytes[pos - 1]);
        let end = pos + clue.len();
        let after_ok = end >= bytes.len() || !is_word_byte(bytes[end]);
        (before_ok && after_ok).then_some(pos)
    })
}

fn scan_clues<S: AsRef<str>>(before: &str, after: &str, clues: &[S]) -> ClueHit {
    let mut hit = ClueHit::default();
    for clue in clues {
        let clue = clue.as_ref().to_lowercase();
        if clue.is_empty() {
            continue;
        }
        let from_before = clue_positions(before, &clue)
            .map(|pos| before.len() - (pos + clue.len()))
            .min();
        let from_after = clue_positions(after, &clue).min();

        let nearest = match (from_before, from_after) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(distance) = nearest {
            hit.distinct += 1;
            hit.distance = Some(hit.distance.map_or(distance, |d| d.min(distance)));
        }
    }
    hit
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Text within `window` characters before and after `[start, end)`.
pub fn context_window(text: &str, start: usize, end: usize, window: usize) -> (&str, &str) {
    let before_start = text[..start]
        .char_indices()
        .rev()
        .nth(window.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let after_end = text[end..]
        .char_indices()
        .nth(window)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    let before_start = floor_char_boundary(text, before_start);
    let after_end = ceil_char_boundary(text, after_end);
    (&text[before_start..start], &text[end..after_end])
}

/// Scores a candidate value from the text around it.
pub fn score_candidate(
    rule: &ContextRule,
    value: &str,
    before: &str,
    after: &str,
    extra_clues: &[String],
) -> (f64, &'static str) {
    let before = before.to_lowercase();
    let after = after.to_lowercase();

    let mut own_clues: Vec<&str> = rule.clues.to_vec();
    own_clues.extend(extra_clues.iter().map(String::as_str));
    let own = scan_clues(&before, &after, &own_clues);

    let conflict_clues: Vec<&str> = rule
        .conflicts
        .iter()
        .flat_map(|kind| rule_for(*kind).clues.iter().copied())
        .collect();
    let conflict = scan_clues(&before, &after, &conflict_clues);

    let valid = (rule.validator)(value);

    let own_wins = matches!(
        (own.distance, conflict.distance),
        (Some(own_d), conflict_d) if conflict_d.map_or(true, |c| own_d <= c)
    );

    if own_wins {
        let mut score = OWN_CLUE_BASE;
        if valid {
            score += OWN_CLUE_VALID_BONUS;
        } else {
            score -= OWN_CLUE_INVALID_PENALTY;
        }
        score += OWN_CLUE_EXTRA_BONUS * own.distinct.saturating_sub(1) as f64;
        (score.min(OWN_CLUE_CAP), "context clue")
    } else if conflict.distance.is_some() {
        (CONFLICT_CONFIDENCE, "conflicting context")
    } else if valid {
        (rule.unclued_confidence, "format valid")
    } else {
        (NO_CLUE_INVALID, "format invalid")
    }
}

/// Whether the line immediately preceding `position` carries one of the
/// rule's clues as a field label.
fn preceding_line_labels_clue(text: &str, position: usize, rule: &ContextRule, extra: &[String]) -> bool {
    let line_start = text[..position].rfind('\n').map(|i| i + 1).unwrap_or(0);
    if line_start == 0 {
        return false;
    }
    let prev_start = text[..line_start - 1].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prev_line = &text[prev_start..line_start - 1];

    let Some((label, _)) = prev_line.split_once(':') else {
        return false;
    };
    let label = label.trim().to_lowercase().replace(['_', '-'], " ");
    rule.clues
        .iter()
        .copied()
        .chain(extra.iter().map(String::as_str))
        .any(|clue| clue_positions(&label, &clue.to_lowercase()).next().is_some())
}

pub struct ContextMatcher<'a> {
    settings: &'a ContextSettings,
    structured: bool,
}

impl<'a> ContextMatcher<'a> {
    pub fn new(settings: &'a ContextSettings, text: &str) -> Self {
        Self {
            settings,
            structured: is_structured_record(text),
        }
    }

    pub fn is_structured(&self) -> bool {
        self.structured
    }

    fn threshold(&self) -> f64 {
        if self.structured {
            self.settings.structured_threshold
        } else {
            self.settings.acceptance_threshold
        }
    }

    /// Runs the rules for `kinds` over `text` on behalf of `pattern`.
    pub fn find_matches(&self, text: &str, pattern: &Pattern, kinds: &[EntityKind]) -> Vec<Match> {
        let mut matches = Vec::new();
        let keywords: Vec<String> = pattern
            .context_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        for kind in kinds {
            let rule = rule_for(*kind);
            let Some(shape) = COMPILED_SHAPES.get(kind) else {
                continue;
            };

            for candidate in shape.find_iter(text) {
                let (before, after) =
                    context_window(text, candidate.start(), candidate.end(), self.settings.window);
                let (mut confidence, reason) =
                    score_candidate(rule, candidate.as_str(), before, after, &keywords);

                if self.structured
                    && preceding_line_labels_clue(text, candidate.start(), rule, &keywords)
                {
                    let boosted = (confidence + self.settings.structured_boost).min(STRUCTURED_BOOST_CAP);
                    confidence = confidence.max(boosted);
                }

                if confidence < self.threshold() {
                    debug!(
                        "Context candidate '{}' for {} rejected at {:.2}",
                        candidate.as_str(),
                        kind,
                        confidence
                    );
                    continue;
                }

                matches.push(
                    Match::new(
                        text,
                        candidate.start(),
                        candidate.end(),
                        MatchMethod::Context,
                        confidence,
                        pattern,
                    )
                    .with_entity(Some(*kind))
                    .with_label(kind.as_str())
                    .with_reason(reason),
                );
            }
        }
        matches
    }
}

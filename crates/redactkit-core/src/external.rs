//! External entity provider boundary
//!
//! Providers (an Ollama model in practice) return labelled entities for a
//! whole text. This module decides which of those entities concern a given
//! pattern, and runs the address similarity fallback, which needs no
//! provider at all.

use crate::inference::{classify_examples, ExampleShape, STREET_SUFFIXES};
use crate::pattern::{clamp_confidence, EntityKind, Match, MatchMethod, Pattern, PatternCategory};
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const ADDRESS_LABEL: &str = "address";
const ADDRESS_MIN_CONFIDENCE: f64 = 0.8;
const SIMILARITY_THRESHOLD: f64 = 0.7;
pub const SIMILARITY_LABEL: &str = "address_similarity";

const LABEL_CATEGORIES: &[(&str, PatternCategory)] = &[
    ("person", PatternCategory::Pii),
    ("person_name", PatternCategory::Pii),
    ("name", PatternCategory::Pii),
    ("email", PatternCategory::Pii),
    ("phone", PatternCategory::Pii),
    ("phone_number", PatternCategory::Pii),
    ("ssn", PatternCategory::Pii),
    ("address", PatternCategory::Pii),
    ("location", PatternCategory::Pii),
    ("date_of_birth", PatternCategory::Pii),
    ("ip_address", PatternCategory::Pii),
    ("credit_card", PatternCategory::Financial),
    ("bank_account", PatternCategory::Financial),
    ("iban", PatternCategory::Financial),
    ("account_number", PatternCategory::Financial),
    ("routing_number", PatternCategory::Financial),
    ("medical_condition", PatternCategory::Medical),
    ("diagnosis", PatternCategory::Medical),
    ("medication", PatternCategory::Medical),
    ("medical_record_number", PatternCategory::Medical),
    ("classification", PatternCategory::Classification),
    ("classified", PatternCategory::Classification),
    ("security_marking", PatternCategory::Classification),
];

const OPENING_WORDS: &[&str] = &[
    "the", "a", "an", "can", "could", "may", "might", "must", "shall", "should", "will", "would",
    "section", "chapter", "note",
];

static CHUNK_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n|[.!?;]\s+").expect("chunk break regex is valid"));

static CITY_STATE_TAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z][A-Za-z .'-]*,\s*[A-Z]{2}(?:\s+\d{5}(?:-\d{4})?)?$").expect("city/state regex is valid")
});

static NUMBER_WORD_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+[A-Za-z]?\s+[A-Za-z]").expect("number/word regex is valid"));

/// An entity reported by a provider, with byte offsets into the text it was
/// given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalEntity {
    pub value: String,
    pub label: String,
    pub confidence: f64,
    pub start: usize,
    pub end: usize,
}

/// Contract for anything that can label entities in text.
#[async_trait]
pub trait EntityProvider: Send + Sync {
    async fn detect_entities(&self, text: &str) -> Result<Vec<ExternalEntity>>;
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

pub fn category_for_label(label: &str) -> Option<PatternCategory> {
    let label = normalize_label(label);
    LABEL_CATEGORIES
        .iter()
        .find(|(known, _)| *known == label)
        .map(|(_, category)| *category)
}

/// Patterns about addresses, by name or by the shape of their examples.
pub fn is_address_pattern(pattern: &Pattern) -> bool {
    pattern.named_entity_kinds().contains(&EntityKind::Address)
        || classify_examples(&pattern.examples) == Some(ExampleShape::Address)
}

/// Whether `entity` concerns `pattern`: its label maps to the pattern's
/// category or equals the pattern's name, and it clears the gate for that
/// kind of pattern.
pub fn is_relevant(entity: &ExternalEntity, pattern: &Pattern) -> bool {
    let label = normalize_label(&entity.label);

    if is_address_pattern(pattern) {
        return label == ADDRESS_LABEL && entity.confidence > ADDRESS_MIN_CONFIDENCE;
    }

    let by_category = category_for_label(&label) == Some(pattern.category);
    let by_name = label == normalize_label(pattern.display_name());

    (by_category || by_name) && entity.confidence >= pattern.confidence_threshold
}

/// Locates the entity in `text`, trusting its offsets only when they slice
/// out exactly its value.
fn resolve_span(text: &str, entity: &ExternalEntity) -> Option<(usize, usize)> {
    if entity.value.is_empty() {
        return None;
    }
    if entity.start < entity.end && text.get(entity.start..entity.end) == Some(entity.value.as_str()) {
        return Some((entity.start, entity.end));
    }
    text.find(&entity.value).map(|start| (start, start + entity.value.len()))
}

/// Turns the provider's entities into matches for one pattern.
pub fn entity_matches(text: &str, pattern: &Pattern, entities: &[ExternalEntity]) -> Vec<Match> {
    let mut matches = Vec::new();

    for entity in entities.iter().filter(|e| is_relevant(e, pattern)) {
        let Some((start, end)) = resolve_span(text, entity) else {
            warn!("Could not locate entity '{}' in text, dropping it", entity.value);
            continue;
        };
        let kind = EntityKind::from_label(&entity.label).into_iter().next();
        matches.push(
            Match::new(text, start, end, MatchMethod::External, entity.confidence, pattern)
                .with_entity(kind)
                .with_label(entity.label.clone())
                .with_reason(format!("provider label '{}'", entity.label)),
        );
    }

    debug!(
        "{} of {} external entities kept for pattern '{}'",
        matches.len(),
        entities.len(),
        pattern.id
    );
    matches
}

/// A sentence- or line-level slice of the input with its byte offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Chunk<'a> {
    text: &'a str,
    start: usize,
}

fn split_chunks(text: &str) -> Vec<Chunk<'_>> {
    let mut chunks = Vec::new();
    let mut cursor = 0;
    let breaks = CHUNK_BREAK
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .chain(std::iter::once((text.len(), text.len())));

    for (break_start, break_end) in breaks {
        let raw = &text[cursor..break_start];
        let leading = raw.len() - raw.trim_start().len();
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            chunks.push(Chunk {
                text: trimmed,
                start: cursor + leading,
            });
        }
        cursor = break_end;
    }
    chunks
}

fn opens_like_prose(chunk: &str) -> bool {
    if chunk.ends_with(':') {
        return true;
    }
    let has_letters = chunk.chars().any(|c| c.is_alphabetic());
    if has_letters && !chunk.chars().any(|c| c.is_lowercase()) && !chunk.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    let first = chunk
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .unwrap_or_default();
    OPENING_WORDS.contains(&first.as_str())
}

fn lower_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn has_address_keyword(words: &[String]) -> bool {
    words.iter().any(|w| STREET_SUFFIXES.contains(&w.as_str()))
}

/// Similarity between a chunk and one address example, on a scale that
/// reaches 1.4 when every component agrees.
pub fn address_similarity(chunk: &str, example: &str) -> f64 {
    let chunk_words = lower_words(chunk);
    let example_words = lower_words(example);
    if chunk_words.is_empty() || example_words.is_empty() {
        return 0.0;
    }

    let mut score = 0.0;
    let has_digit = |s: &str| s.chars().any(|c| c.is_ascii_digit());
    if has_digit(chunk) && has_digit(example) {
        score += 0.2;
    }
    if has_address_keyword(&chunk_words) && has_address_keyword(&example_words) {
        score += 0.4;
    }
    let trim_tail = |s: &str| s.trim().trim_end_matches('.').to_string();
    if CITY_STATE_TAIL.is_match(&trim_tail(chunk)) && CITY_STATE_TAIL.is_match(&trim_tail(example)) {
        score += 0.3;
    }
    if NUMBER_WORD_HEAD.is_match(chunk) && NUMBER_WORD_HEAD.is_match(example.trim()) {
        score += 0.3;
    }
    let (a, b) = (chunk_words.len() as f64, example_words.len() as f64);
    score += 0.2 * a.min(b) / a.max(b);

    score
}

/// Chunks of `text` that resemble one of the pattern's address examples.
pub fn address_similarity_matches(text: &str, pattern: &Pattern) -> Vec<Match> {
    let examples: Vec<&str> = pattern
        .examples
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect();
    if examples.is_empty() {
        return Vec::new();
    }

    let mut matches = Vec::new();
    for chunk in split_chunks(text) {
        if opens_like_prose(chunk.text) {
            continue;
        }
        let best = examples
            .iter()
            .map(|example| address_similarity(chunk.text, example))
            .fold(0.0_f64, f64::max);
        if best <= SIMILARITY_THRESHOLD {
            continue;
        }

        let span = chunk.text.trim_end_matches('.');
        matches.push(
            Match::new(
                text,
                chunk.start,
                chunk.start + span.len(),
                MatchMethod::External,
                clamp_confidence(best),
                pattern,
            )
            .with_entity(Some(EntityKind::Address))
            .with_label(SIMILARITY_LABEL)
            .with_reason(format!("address similarity {:.2}", best)),
        );
    }

    debug!(
        "Address similarity found {} chunks for pattern '{}'",
        matches.len(),
        pattern.id
    );
    matches
}

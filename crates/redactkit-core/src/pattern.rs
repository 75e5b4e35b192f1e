//! Pattern definitions and the match records produced by detection

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

fn default_confidence_threshold() -> f64 {
    0.7
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternCategory {
    Pii,
    Financial,
    Medical,
    Classification,
    Custom,
}

impl PatternCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pii => "pii",
            Self::Financial => "financial",
            Self::Medical => "medical",
            Self::Classification => "classification",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for PatternCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-authored description of what to look for.
///
/// Patterns are owned by the persistence layer and handed to the engine
/// read-only for the duration of one detection call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub category: PatternCategory,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub additional_regexes: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
    /// Exact, case-sensitive strings that must never be reported.
    #[serde(default)]
    pub excluded_examples: Vec<String>,
    #[serde(default)]
    pub context_keywords: Vec<String>,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Pattern {
    pub fn new(id: impl Into<String>, category: PatternCategory) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category,
            regex: None,
            additional_regexes: Vec::new(),
            examples: Vec::new(),
            excluded_examples: Vec::new(),
            context_keywords: Vec::new(),
            confidence_threshold: default_confidence_threshold(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    pub fn with_additional_regex(mut self, regex: impl Into<String>) -> Self {
        self.additional_regexes.push(regex.into());
        self
    }

    pub fn with_examples<I, S>(mut self, examples: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.examples.extend(examples.into_iter().map(Into::into));
        self
    }

    pub fn with_excluded<I, S>(mut self, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_examples.extend(excluded.into_iter().map(Into::into));
        self
    }

    pub fn with_context_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.context_keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// All explicit regexes, primary first.
    pub fn explicit_regexes(&self) -> impl Iterator<Item = &str> {
        self.regex
            .iter()
            .chain(self.additional_regexes.iter())
            .map(String::as_str)
            .filter(|r| !r.trim().is_empty())
    }

    pub fn has_explicit_regex(&self) -> bool {
        self.explicit_regexes().next().is_some()
    }

    pub fn is_excluded(&self, text: &str) -> bool {
        self.excluded_examples.iter().any(|e| e == text)
    }

    /// Entity kinds this pattern is about, judged from its name, id and
    /// context keywords.
    /// The human-readable name, falling back to the id when none was given.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    pub fn named_entity_kinds(&self) -> Vec<EntityKind> {
        let mut kinds = Vec::new();
        let sources = [self.id.as_str(), self.display_name()]
            .into_iter()
            .chain(self.context_keywords.iter().map(String::as_str));

        for source in sources {
            for kind in EntityKind::from_label(source) {
                if !kinds.contains(&kind) {
                    kinds.push(kind);
                }
            }
        }
        kinds
    }
}

/// The built-in entity library shared by the context-aware and field-aware
/// matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Ssn,
    Email,
    CreditCard,
    Phone,
    DateOfBirth,
    Address,
    PersonName,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Ssn,
        EntityKind::Email,
        EntityKind::CreditCard,
        EntityKind::Phone,
        EntityKind::DateOfBirth,
        EntityKind::Address,
        EntityKind::PersonName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssn => "ssn",
            Self::Email => "email",
            Self::CreditCard => "credit_card",
            Self::Phone => "phone",
            Self::DateOfBirth => "date_of_birth",
            Self::Address => "address",
            Self::PersonName => "person_name",
        }
    }

    /// Keyword lookup over free-form labels such as pattern names.
    ///
    /// "address" only names a street address when it is not qualified as an
    /// email, network or wallet address.
    pub fn from_label(label: &str) -> Vec<EntityKind> {
        let lower = label.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has_word = |w: &str| words.contains(&w);

        let mut kinds = Vec::new();
        if has_word("ssn") || lower.contains("social security") || lower.contains("social_security") {
            kinds.push(Self::Ssn);
        }
        if lower.contains("email") || lower.contains("e-mail") {
            kinds.push(Self::Email);
        }
        if lower.contains("credit") || has_word("card") || has_word("cc") || has_word("pan") {
            kinds.push(Self::CreditCard);
        }
        if lower.contains("phone") || has_word("tel") || has_word("telephone") || has_word("mobile") {
            kinds.push(Self::Phone);
        }
        if lower.contains("birth") || has_word("dob") {
            kinds.push(Self::DateOfBirth);
        }
        let postal_address = words
            .iter()
            .enumerate()
            .any(|(i, w)| *w == "address" && (i == 0 || !NON_POSTAL_QUALIFIERS.contains(&words[i - 1])));
        if postal_address || has_word("street") {
            kinds.push(Self::Address);
        }
        if has_word("name") || has_word("person") || lower.contains("first_name") || lower.contains("last_name") {
            kinds.push(Self::PersonName);
        }
        kinds
    }
}

const NON_POSTAL_QUALIFIERS: &[&str] = &["email", "mail", "ip", "ipv4", "ipv6", "mac", "web", "url", "wallet", "bitcoin"];

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMethod {
    Regex,
    Example,
    Context,
    Field,
    External,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Example => "example",
            Self::Context => "context",
            Self::Field => "field",
            Self::External => "external",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate span produced by one of the matchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub text: String,
    pub start: usize,
    pub end: usize,
    pub method: MatchMethod,
    pub confidence: f64,
    pub pattern_id: String,
    pub category: PatternCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Match {
    /// Builds a match over `source[start..end]` with its confidence clamped.
    pub fn new(
        source: &str,
        start: usize,
        end: usize,
        method: MatchMethod,
        confidence: f64,
        pattern: &Pattern,
    ) -> Self {
        debug_assert!(start < end && end <= source.len(), "invalid span {}..{}", start, end);
        Self {
            text: source[start..end].to_string(),
            start,
            end,
            method,
            confidence: clamp_confidence(confidence),
            pattern_id: pattern.id.clone(),
            category: pattern.category,
            entity: None,
            label: None,
            reason: None,
        }
    }

    pub fn with_entity(mut self, entity: Option<EntityKind>) -> Self {
        self.entity = entity;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn overlaps(&self, other: &Match) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Clamps into [0, 1]; NaN collapses to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A file-backed collection of patterns, standing in for the persistence
/// collaborator when running from the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternSet {
    #[serde(default)]
    pub patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let set: Self = if is_json {
            serde_json::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse pattern file {}: {}", path.display(), e))?
        } else {
            toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("Failed to parse pattern file {}: {}", path.display(), e))?
        };
        Ok(set)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

//! Redaction styles and the text rewriter

use crate::pattern::{EntityKind, Match, PatternCategory};
use crate::validators::{digits_of, is_valid_credit_card, is_valid_ssn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const DEFAULT_FULL_LABEL: &str = "[REDACTED]";
const DEFAULT_MASK: &str = "*";
const PARTIAL_VISIBLE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionKind {
    Full,
    Partial,
    Token,
    Mask,
}

impl RedactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Partial => "partial",
            Self::Token => "token",
            Self::Mask => "mask",
        }
    }
}

impl fmt::Display for RedactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedactionKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "partial" => Ok(Self::Partial),
            "token" => Ok(Self::Token),
            "mask" => Ok(Self::Mask),
            other => Err(anyhow::anyhow!(
                "Unknown redaction style '{}', expected one of: full, partial, token, mask",
                other
            )),
        }
    }
}

/// A redaction kind plus its optional template.
///
/// Templates mean different things per kind: a label for `full` (with
/// `{category}` substituted), a `[PREFIX-{n}]` layout or bare prefix for
/// `token`, and the filler for `mask`. `partial` ignores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionStyle {
    pub kind: RedactionKind,
    #[serde(default)]
    pub template: Option<String>,
}

impl RedactionStyle {
    pub fn new(kind: RedactionKind) -> Self {
        Self { kind, template: None }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn full(label: impl Into<String>) -> Self {
        Self::new(RedactionKind::Full).with_template(label)
    }

    pub fn partial() -> Self {
        Self::new(RedactionKind::Partial)
    }

    pub fn token(template: impl Into<String>) -> Self {
        Self::new(RedactionKind::Token).with_template(template)
    }

    pub fn mask(filler: impl Into<String>) -> Self {
        Self::new(RedactionKind::Mask).with_template(filler)
    }

    /// The built-in style for a category family.
    pub fn default_for(category: PatternCategory) -> Self {
        match category {
            PatternCategory::Pii => Self::token("[PII-{n}]"),
            PatternCategory::Financial => Self::partial(),
            PatternCategory::Medical => Self::full(DEFAULT_FULL_LABEL),
            PatternCategory::Classification => Self::full("[CLASSIFIED]"),
            PatternCategory::Custom => Self::mask(DEFAULT_MASK),
        }
    }
}

/// Which style each category is redacted with.
///
/// A per-category entry in `styles` wins, then `default_style`, then the
/// category's built-in default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RedactionPolicy {
    #[serde(default)]
    pub default_style: Option<RedactionStyle>,
    #[serde(default)]
    pub styles: BTreeMap<PatternCategory, RedactionStyle>,
}

impl RedactionPolicy {
    /// Applies `style` to every category without an explicit entry.
    pub fn uniform(style: RedactionStyle) -> Self {
        Self {
            default_style: Some(style),
            styles: BTreeMap::new(),
        }
    }

    pub fn with_style(mut self, category: PatternCategory, style: RedactionStyle) -> Self {
        self.styles.insert(category, style);
        self
    }

    pub fn style_for(&self, category: PatternCategory) -> RedactionStyle {
        self.styles
            .get(&category)
            .or(self.default_style.as_ref())
            .cloned()
            .unwrap_or_else(|| RedactionStyle::default_for(category))
    }
}

fn last_digits(text: &str, count: usize) -> String {
    let digits = digits_of(text);
    digits[digits.len().saturating_sub(count)..]
        .iter()
        .filter_map(|d| char::from_digit(*d, 10))
        .collect()
}

fn looks_like_ssn(m: &Match) -> bool {
    match m.entity {
        Some(EntityKind::Ssn) => digits_of(&m.text).len() == 9,
        Some(_) => false,
        None => is_valid_ssn(&m.text),
    }
}

fn looks_like_card(m: &Match) -> bool {
    match m.entity {
        Some(EntityKind::CreditCard) => digits_of(&m.text).len() >= PARTIAL_VISIBLE,
        Some(_) => false,
        None => is_valid_credit_card(&m.text),
    }
}

/// Masks everything but the tail that identifies the value to a human.
pub fn partial_redact(m: &Match) -> String {
    if looks_like_ssn(m) {
        return format!("XXX-XX-{}", last_digits(&m.text, PARTIAL_VISIBLE));
    }
    if looks_like_card(m) {
        return format!("****-****-****-{}", last_digits(&m.text, PARTIAL_VISIBLE));
    }

    let chars: Vec<char> = m.text.chars().collect();
    if chars.len() <= PARTIAL_VISIBLE {
        return "*".repeat(chars.len());
    }
    let hidden = chars.len() - PARTIAL_VISIBLE;
    let mut out = "*".repeat(hidden);
    out.extend(&chars[hidden..]);
    out
}

fn full_label(style: &RedactionStyle, category: PatternCategory) -> String {
    style
        .template
        .as_deref()
        .unwrap_or(DEFAULT_FULL_LABEL)
        .replace("{category}", category.as_str())
}

fn token_label(style: &RedactionStyle, category: PatternCategory, n: usize) -> String {
    let template = style
        .template
        .clone()
        .unwrap_or_else(|| category.as_str().to_uppercase());
    if template.contains("{n}") {
        template
            .replace("{category}", category.as_str())
            .replace("{n}", &n.to_string())
    } else {
        format!("[{}-{}]", template, n)
    }
}

fn mask_text(style: &RedactionStyle, text: &str) -> String {
    let filler = style.template.as_deref().unwrap_or(DEFAULT_MASK);
    let mut filler_chars = filler.chars();
    match (filler_chars.next(), filler_chars.next()) {
        (Some(c), None) => std::iter::repeat(c).take(text.chars().count()).collect(),
        (None, _) => DEFAULT_MASK.repeat(text.chars().count()),
        _ => filler.to_string(),
    }
}

/// Rewrites `text`, replacing each match with its category's redaction.
///
/// `matches` must be interval-disjoint. Tokens are numbered in order of
/// appearance, and replacements are spliced from the end backward so the
/// offsets of earlier matches stay valid.
pub fn redact(text: &str, matches: &[Match], policy: &RedactionPolicy) -> String {
    let mut ordered: Vec<&Match> = matches.iter().collect();
    ordered.sort_by_key(|m| m.start);

    let mut next_token = 0;
    let replacements: Vec<(usize, usize, String)> = ordered
        .into_iter()
        .map(|m| {
            let style = policy.style_for(m.category);
            let replacement = match style.kind {
                RedactionKind::Full => full_label(&style, m.category),
                RedactionKind::Partial => partial_redact(m),
                RedactionKind::Token => {
                    next_token += 1;
                    token_label(&style, m.category, next_token)
                }
                RedactionKind::Mask => mask_text(&style, &m.text),
            };
            (m.start, m.end, replacement)
        })
        .collect();

    let mut redacted = text.to_string();
    for (start, end, replacement) in replacements.iter().rev() {
        debug_assert!(redacted.is_char_boundary(*start) && redacted.is_char_boundary(*end));
        redacted.replace_range(*start..*end, replacement);
    }

    debug!("Redacted {} spans", replacements.len());
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{MatchMethod, Pattern};

    fn match_in(text: &str, needle: &str, category: PatternCategory, entity: Option<EntityKind>) -> Match {
        let start = text.find(needle).unwrap();
        let pattern = Pattern::new(category.as_str(), category);
        Match::new(text, start, start + needle.len(), MatchMethod::Regex, 0.9, &pattern).with_entity(entity)
    }

    #[test]
    fn test_style_precedence() {
        let policy = RedactionPolicy::uniform(RedactionStyle::mask("#"))
            .with_style(PatternCategory::Medical, RedactionStyle::full("[PHI]"));

        assert_eq!(policy.style_for(PatternCategory::Medical), RedactionStyle::full("[PHI]"));
        assert_eq!(policy.style_for(PatternCategory::Pii), RedactionStyle::mask("#"));

        let defaults = RedactionPolicy::default();
        assert_eq!(defaults.style_for(PatternCategory::Financial).kind, RedactionKind::Partial);
        assert_eq!(
            defaults.style_for(PatternCategory::Classification),
            RedactionStyle::full("[CLASSIFIED]")
        );
    }

    #[test]
    fn test_partial_ssn_and_card() {
        let text = "ssn 123-45-6789 card 4111 1111 1111 1111";
        let ssn = match_in(text, "123-45-6789", PatternCategory::Pii, Some(EntityKind::Ssn));
        let card = match_in(text, "4111 1111 1111 1111", PatternCategory::Financial, None);

        assert_eq!(partial_redact(&ssn), "XXX-XX-6789");
        assert_eq!(partial_redact(&card), "****-****-****-1111");
    }

    #[test]
    fn test_partial_generic_keeps_last_four() {
        let text = "account ACCT-99812345";
        let m = match_in(text, "ACCT-99812345", PatternCategory::Financial, None);
        assert_eq!(partial_redact(&m), "*********2345");

        let short = match_in(text, "ACCT", PatternCategory::Financial, None);
        assert_eq!(partial_redact(&short), "****");
    }

    #[test]
    fn test_tokens_numbered_left_to_right() {
        let text = "Alice met Bob and Carol";
        let matches = vec![
            match_in(text, "Carol", PatternCategory::Pii, None),
            match_in(text, "Alice", PatternCategory::Pii, None),
            match_in(text, "Bob", PatternCategory::Pii, None),
        ];
        let redacted = redact(text, &matches, &RedactionPolicy::default());

        assert_eq!(redacted, "[PII-1] met [PII-2] and [PII-3]");
    }

    #[test]
    fn test_token_prefix_template() {
        let text = "Alice and Bob";
        let matches = vec![
            match_in(text, "Alice", PatternCategory::Custom, None),
            match_in(text, "Bob", PatternCategory::Custom, None),
        ];
        let policy = RedactionPolicy::uniform(RedactionStyle::new(RedactionKind::Token));

        assert_eq!(redact(text, &matches, &policy), "[CUSTOM-1] and [CUSTOM-2]");

        let policy = RedactionPolicy::uniform(RedactionStyle::token("NAME"));
        assert_eq!(redact(text, &matches, &policy), "[NAME-1] and [NAME-2]");
    }

    #[test]
    fn test_full_substitutes_category() {
        let text = "diagnosis: flu";
        let matches = vec![match_in(text, "flu", PatternCategory::Medical, None)];
        let policy = RedactionPolicy::uniform(RedactionStyle::full("<{category}>"));

        assert_eq!(redact(text, &matches, &policy), "diagnosis: <medical>");
        assert_eq!(
            redact(text, &matches, &RedactionPolicy::default()),
            "diagnosis: [REDACTED]"
        );
    }

    #[test]
    fn test_mask_single_char_and_filler() {
        let text = "code Phoenix here";
        let matches = vec![match_in(text, "Phoenix", PatternCategory::Custom, None)];

        assert_eq!(redact(text, &matches, &RedactionPolicy::default()), "code ******* here");

        let policy = RedactionPolicy::uniform(RedactionStyle::mask("[hidden]"));
        assert_eq!(redact(text, &matches, &policy), "code [hidden] here");
    }

    #[test]
    fn test_mask_counts_characters_not_bytes() {
        let text = "name: José!";
        let matches = vec![match_in(text, "José", PatternCategory::Custom, None)];

        assert_eq!(redact(text, &matches, &RedactionPolicy::default()), "name: ****!");
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("Partial".parse::<RedactionKind>().unwrap(), RedactionKind::Partial);
        assert!("shred".parse::<RedactionKind>().is_err());
    }

    #[test]
    fn test_policy_toml_roundtrip_shape() {
        let policy: RedactionPolicy = toml::from_str(
            r##"
            default_style = { kind = "full" }

            [styles.financial]
            kind = "mask"
            template = "#"
            "##,
        )
        .unwrap();

        assert_eq!(policy.style_for(PatternCategory::Financial), RedactionStyle::mask("#"));
        assert_eq!(policy.style_for(PatternCategory::Pii).kind, RedactionKind::Full);
    }
}

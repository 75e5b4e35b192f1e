//! Regular-expression induction from example strings
//!
//! Example sets are classified against a fixed list of well-known shapes,
//! checked in priority order. Every example has to satisfy a shape before it
//! is accepted. When no shape fits, examples are abstracted into a token
//! sequence (digit runs, capitalized words, ...) and a regex is only produced
//! if every example reduces to the same sequence.

use crate::pattern::EntityKind;
use crate::validators::{is_valid_credit_card, is_valid_date, luhn_check};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SSN_REGEX: &str = r"\b\d{3}[-\s]?\d{2}[-\s]?\d{4}\b";
pub const PHONE_REGEX: &str = r"(?:\+?1[-.\s]?)?\(?\b\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b";
pub const EMAIL_REGEX: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
pub const GENERIC_CARD_REGEX: &str = r"\b(?:\d[-\s]?){12,18}\d\b";
pub const DATE_REGEX: &str = r"\b(?:\d{4}[-/]\d{1,2}[-/]\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.]\d{4}|(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4})\b";

pub const STREET_SUFFIXES: &[&str] = &[
    "street", "st", "avenue", "ave", "road", "rd", "boulevard", "blvd", "lane", "ln", "drive", "dr",
    "court", "ct", "way", "place", "pl", "circle", "cir", "parkway", "pkwy", "terrace", "ter",
    "highway", "hwy", "square", "sq", "trail", "trl",
];

static ADDRESS_SHAPE: Lazy<Regex> = Lazy::new(|| {
    let suffixes = STREET_SUFFIXES.join("|");
    Regex::new(&format!(
        r"(?i)^\d{{1,6}}[A-Za-z]?\s+(?:[A-Za-z0-9.'#-]+\s+){{0,5}}(?:{})\.?(?:\s*,.*)?$",
        suffixes
    ))
    .expect("address shape regex is valid")
});

static SSN_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{3}[-\s]?\d{2}[-\s]?\d{4}$").expect("ssn shape regex is valid"));

static PHONE_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\+?1[-.\s]?)?(?:\(\d{3}\)|\d{3})[-.\s]?\d{3}[-.\s]?\d{4}$")
        .expect("phone shape regex is valid")
});

static EMAIL_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("email shape regex is valid")
});

static NUMERIC_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:[-\s./]\d+)*$").expect("numeric shape regex is valid"));

/// The shape an example set was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleShape {
    Address,
    Ssn,
    Phone,
    Email,
    CreditCard,
    Date,
    Numeric,
    Structural,
}

impl ExampleShape {
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            Self::Address => Some(EntityKind::Address),
            Self::Ssn => Some(EntityKind::Ssn),
            Self::Phone => Some(EntityKind::Phone),
            Self::Email => Some(EntityKind::Email),
            Self::CreditCard => Some(EntityKind::CreditCard),
            Self::Date => Some(EntityKind::DateOfBirth),
            Self::Numeric | Self::Structural => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferredPattern {
    pub regex: String,
    pub shape: ExampleShape,
}

fn usable_examples(examples: &[String]) -> Vec<&str> {
    examples
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .collect()
}

fn all_match(examples: &[&str], check: impl Fn(&str) -> bool) -> bool {
    examples.iter().all(|&e| check(e))
}

pub fn is_address_like(value: &str) -> bool {
    ADDRESS_SHAPE.is_match(value.trim())
}

/// Classifies the example set, returning the first shape that every example
/// satisfies. `Structural` means no known shape applied.
pub fn classify_examples(examples: &[String]) -> Option<ExampleShape> {
    let examples = usable_examples(examples);
    if examples.is_empty() {
        return None;
    }
    let shape = if all_match(&examples, |e| ADDRESS_SHAPE.is_match(e)) {
        ExampleShape::Address
    } else if all_match(&examples, |e| SSN_SHAPE.is_match(e)) {
        ExampleShape::Ssn
    } else if all_match(&examples, |e| PHONE_SHAPE.is_match(e)) {
        ExampleShape::Phone
    } else if all_match(&examples, |e| EMAIL_SHAPE.is_match(e)) {
        ExampleShape::Email
    } else if all_match(&examples, is_valid_credit_card) {
        ExampleShape::CreditCard
    } else if all_match(&examples, is_valid_date) {
        ExampleShape::Date
    } else if NUMERIC_SHAPE.is_match(examples[0]) && numeric_layout(&examples).is_some() {
        ExampleShape::Numeric
    } else {
        ExampleShape::Structural
    };
    Some(shape)
}

/// Derives a regex from examples, or `None` when no safe generalization
/// exists. Address-shaped sets always yield `None`.
pub fn infer_pattern(examples: &[String]) -> Option<InferredPattern> {
    let shape = classify_examples(examples)?;
    let usable = usable_examples(examples);

    let regex = match shape {
        ExampleShape::Address => {
            debug!("Examples look like street addresses, skipping regex inference");
            return None;
        }
        ExampleShape::Ssn => SSN_REGEX.to_string(),
        ExampleShape::Phone => PHONE_REGEX.to_string(),
        ExampleShape::Email => EMAIL_REGEX.to_string(),
        ExampleShape::CreditCard => card_regex(&usable),
        ExampleShape::Date => DATE_REGEX.to_string(),
        ExampleShape::Numeric => numeric_layout(&usable)?.to_regex(),
        ExampleShape::Structural => structural_regex(&usable)?,
    };

    let compiled = match Regex::new(&regex) {
        Ok(compiled) => compiled,
        Err(e) => {
            debug!("Inferred regex '{}' failed to compile: {}", regex, e);
            return None;
        }
    };
    if let Some(miss) = usable.iter().find(|e| !compiled.is_match(e)) {
        debug!("Inferred {:?} regex does not match example '{}', discarding", shape, miss);
        return None;
    }

    debug!("Inferred {:?} regex from {} examples: {}", shape, usable.len(), regex);
    Some(InferredPattern { regex, shape })
}

fn digit_groups(value: &str) -> Vec<usize> {
    value
        .split(|c: char| !c.is_ascii_digit())
        .filter(|g| !g.is_empty())
        .map(str::len)
        .collect()
}

fn card_regex(examples: &[&str]) -> String {
    debug_assert!(examples.iter().all(|e| luhn_check(e)));
    let first = digit_groups(examples[0]);
    let identical = examples.iter().all(|e| digit_groups(e) == first);

    if identical && first.len() > 1 {
        let groups: Vec<String> = first.iter().map(|n| format!(r"\d{{{}}}", n)).collect();
        format!(r"\b{}\b", groups.join(r"[-\s]?"))
    } else if identical {
        format!(r"\b\d{{{}}}\b", first[0])
    } else {
        GENERIC_CARD_REGEX.to_string()
    }
}

/// Group lengths and separators of a purely numeric example set.
#[derive(Debug, PartialEq)]
struct NumericLayout {
    separators: Vec<char>,
    ranges: Vec<(usize, usize)>,
}

impl NumericLayout {
    fn to_regex(&self) -> String {
        let mut regex = String::from(r"\b");
        for (i, (min, max)) in self.ranges.iter().enumerate() {
            if i > 0 {
                regex.push_str(&regex::escape(&self.separators[i - 1].to_string()));
            }
            if min == max {
                regex.push_str(&format!(r"\d{{{}}}", min));
            } else {
                regex.push_str(&format!(r"\d{{{},{}}}", min, max));
            }
        }
        regex.push_str(r"\b");
        regex
    }
}

fn split_numeric(value: &str) -> (Vec<char>, Vec<usize>) {
    let mut separators = Vec::new();
    let mut lengths = vec![0usize];
    for c in value.chars() {
        if c.is_ascii_digit() {
            if let Some(last) = lengths.last_mut() {
                *last += 1;
            }
        } else {
            separators.push(c);
            lengths.push(0);
        }
    }
    (separators, lengths)
}

fn numeric_layout(examples: &[&str]) -> Option<NumericLayout> {
    if !examples.iter().all(|e| NUMERIC_SHAPE.is_match(e)) {
        return None;
    }
    let (separators, first_lengths) = split_numeric(examples[0]);
    let mut ranges: Vec<(usize, usize)> = first_lengths.iter().map(|&n| (n, n)).collect();

    for example in &examples[1..] {
        let (seps, lengths) = split_numeric(example);
        if seps != separators {
            return None;
        }
        for (range, len) in ranges.iter_mut().zip(lengths) {
            range.0 = range.0.min(len);
            range.1 = range.1.max(len);
        }
    }
    Some(NumericLayout { separators, ranges })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShapeToken {
    Digits,
    Capitalized,
    Lower,
    Upper,
    Space,
    Literal(char),
}

impl ShapeToken {
    fn is_word(&self) -> bool {
        !matches!(self, Self::Space | Self::Literal(_))
    }
}

/// Splits a value into shape tokens paired with their run lengths.
fn tokenize(value: &str) -> Vec<(ShapeToken, usize)> {
    let chars: Vec<char> = value.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let run = |from: usize, pred: &dyn Fn(char) -> bool| -> usize {
        chars[from..].iter().take_while(|&&c| pred(c)).count()
    };

    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            let n = run(i, &|c| c.is_ascii_digit());
            tokens.push((ShapeToken::Digits, n));
            i += n;
        } else if c.is_ascii_lowercase() {
            let n = run(i, &|c| c.is_ascii_lowercase());
            tokens.push((ShapeToken::Lower, n));
            i += n;
        } else if c.is_ascii_uppercase() {
            let upper = run(i, &|c| c.is_ascii_uppercase());
            let followed_by_lower = chars.get(i + upper).map_or(false, |c| c.is_ascii_lowercase());
            if followed_by_lower {
                if upper > 1 {
                    tokens.push((ShapeToken::Upper, upper - 1));
                }
                let start = i + upper - 1;
                let lower = run(start + 1, &|c| c.is_ascii_lowercase());
                tokens.push((ShapeToken::Capitalized, lower + 1));
                i = start + 1 + lower;
            } else {
                tokens.push((ShapeToken::Upper, upper));
                i += upper;
            }
        } else if c.is_whitespace() {
            let n = run(i, &|c| c.is_whitespace());
            tokens.push((ShapeToken::Space, n));
            i += n;
        } else {
            tokens.push((ShapeToken::Literal(c), 1));
            i += 1;
        }
    }
    tokens
}

fn structural_regex(examples: &[&str]) -> Option<String> {
    let tokenized: Vec<Vec<(ShapeToken, usize)>> = examples.iter().map(|e| tokenize(e)).collect();
    let reference: Vec<&ShapeToken> = tokenized[0].iter().map(|(t, _)| t).collect();
    if reference.is_empty() {
        return None;
    }

    let same_sequence = tokenized
        .iter()
        .all(|tokens| tokens.iter().map(|(t, _)| t).eq(reference.iter().copied()));
    if !same_sequence {
        debug!("Examples do not share a common structure, refusing to guess a regex");
        return None;
    }

    let mut regex = String::new();
    if reference.first().map_or(false, |t| t.is_word()) {
        regex.push_str(r"\b");
    }
    for (position, token) in reference.iter().enumerate() {
        let lengths = tokenized.iter().map(|tokens| tokens[position].1);
        let min = lengths.clone().min().unwrap_or(1);
        let max = lengths.max().unwrap_or(1);
        let quantifier = |min: usize, max: usize| {
            if min == max {
                format!("{{{}}}", min)
            } else {
                format!("{{{},{}}}", min, max)
            }
        };

        match token {
            ShapeToken::Digits => regex.push_str(&format!(r"\d{}", quantifier(min, max))),
            ShapeToken::Lower => regex.push_str(&format!("[a-z]{}", quantifier(min, max))),
            ShapeToken::Upper => regex.push_str(&format!("[A-Z]{}", quantifier(min, max))),
            ShapeToken::Capitalized => {
                regex.push_str("[A-Z]");
                regex.push_str(&format!("[a-z]{}", quantifier(min - 1, max - 1)));
            }
            ShapeToken::Space => regex.push_str(r"\s+"),
            ShapeToken::Literal(c) => regex.push_str(&regex::escape(&c.to_string())),
        }
    }
    if reference.last().map_or(false, |t| t.is_word()) {
        regex.push_str(r"\b");
    }
    Some(regex)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn examples(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn assert_matches_all(values: &[&str]) -> InferredPattern {
        let inferred = infer_pattern(&examples(values)).expect("a regex should be inferred");
        let regex = Regex::new(&inferred.regex).unwrap();
        for value in values {
            assert!(regex.is_match(value), "{} should match {}", inferred.regex, value);
        }
        inferred
    }

    #[test]
    fn test_addresses_are_not_generalized() {
        let set = examples(&["123 Main Street", "456 Oak Avenue"]);

        assert_eq!(classify_examples(&set), Some(ExampleShape::Address));
        assert!(infer_pattern(&set).is_none());
    }

    #[test]
    fn test_ssn_shape() {
        let inferred = assert_matches_all(&["123-45-6789", "987 65 4321"]);
        assert_eq!(inferred.shape, ExampleShape::Ssn);
        assert_eq!(inferred.regex, SSN_REGEX);
    }

    #[test]
    fn test_phone_shape() {
        let inferred = assert_matches_all(&["555-123-4567", "(555) 987-6543", "+1 555 222 3333"]);
        assert_eq!(inferred.shape, ExampleShape::Phone);
    }

    #[test]
    fn test_email_shape() {
        let inferred = assert_matches_all(&["john@example.com", "jane.doe@corp.co.uk"]);
        assert_eq!(inferred.shape, ExampleShape::Email);
    }

    #[test]
    fn test_credit_card_identical_grouping() {
        let inferred = assert_matches_all(&["4111-1111-1111-1111", "5500-0000-0000-0004"]);
        assert_eq!(inferred.shape, ExampleShape::CreditCard);
        assert_eq!(inferred.regex, r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b");
    }

    #[test]
    fn test_credit_card_mixed_grouping() {
        let inferred = assert_matches_all(&["4111 1111 1111 1111", "378282246310005"]);
        assert_eq!(inferred.shape, ExampleShape::CreditCard);
        assert_eq!(inferred.regex, GENERIC_CARD_REGEX);
    }

    #[test]
    fn test_luhn_failure_is_not_a_card() {
        let set = examples(&["4111111111111112"]);
        assert_ne!(classify_examples(&set), Some(ExampleShape::CreditCard));
    }

    #[test]
    fn test_date_shape() {
        let inferred = assert_matches_all(&["1985-03-15", "03/15/1990", "March 3, 2001"]);
        assert_eq!(inferred.shape, ExampleShape::Date);
    }

    #[test]
    fn test_numeric_exact_length() {
        let inferred = assert_matches_all(&["12345678", "87654321"]);
        assert_eq!(inferred.shape, ExampleShape::Numeric);
        assert_eq!(inferred.regex, r"\b\d{8}\b");
    }

    #[test]
    fn test_numeric_varying_length() {
        let inferred = assert_matches_all(&["1234", "123456"]);
        assert_eq!(inferred.regex, r"\b\d{4,6}\b");
    }

    #[test]
    fn test_numeric_grouped() {
        let inferred = assert_matches_all(&["12.345", "98.765"]);
        assert_eq!(inferred.regex, r"\b\d{2}\.\d{3}\b");
    }

    #[test]
    fn test_structural_abstraction() {
        let inferred = assert_matches_all(&["MRN-004521", "MRN-887310"]);
        assert_eq!(inferred.shape, ExampleShape::Structural);

        let regex = Regex::new(&inferred.regex).unwrap();
        assert!(regex.is_match("Patient MRN-123456 admitted"));
        assert!(!regex.is_match("mrn-123456"));
    }

    #[test]
    fn test_structural_capitalized_words() {
        let inferred = assert_matches_all(&["Project Falcon", "Operation Neptune"]);
        let regex = Regex::new(&inferred.regex).unwrap();
        assert!(regex.is_match("Project Phoenix"));
        assert!(!regex.is_match("project phoenix"));
    }

    #[test]
    fn test_structural_mismatch_returns_none() {
        let set = examples(&["ABC-123", "hello world"]);
        assert!(infer_pattern(&set).is_none());
    }

    #[test]
    fn test_empty_examples() {
        assert!(infer_pattern(&[]).is_none());
        assert!(infer_pattern(&examples(&["  "])).is_none());
    }

    #[test]
    fn test_tokenize_mixed_case() {
        let tokens: Vec<ShapeToken> = tokenize("ABcd").into_iter().map(|(t, _)| t).collect();
        assert_eq!(tokens, vec![ShapeToken::Upper, ShapeToken::Capitalized]);
    }
}

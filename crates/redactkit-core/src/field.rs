//! Field-aware matching over `Record N:` / `field: value` text
//!
//! Records are parsed line by line. Each field name is normalized and mapped
//! through an alias table, then tested against every field category. The
//! confidence depends only on how specific the field-name match was, never on
//! the value itself; the value only has to pass the category's shape and
//! validator.

use crate::pattern::{EntityKind, Match, MatchMethod, Pattern};
use crate::validators::{
    is_plausible_birth_date, is_valid_credit_card, is_valid_email, is_valid_phone, is_valid_ssn,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

static RECORD_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*record\s+(\d+)\s*:\s*$").expect("record header regex is valid"));

static FIELD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 _\-./#]{0,60}?)\s*:\s*(\S.*?)\s*$").expect("field line regex is valid")
});

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("separator regex is valid"));

const FIELD_ALIASES: &[(&str, &str)] = &[
    ("fname", "first_name"),
    ("firstname", "first_name"),
    ("given_name", "first_name"),
    ("forename", "first_name"),
    ("lname", "last_name"),
    ("lastname", "last_name"),
    ("surname", "last_name"),
    ("family_name", "last_name"),
    ("fullname", "full_name"),
    ("ssn", "ssn"),
    ("social_security", "ssn"),
    ("social_security_number", "ssn"),
    ("soc_sec_no", "ssn"),
    ("ss_number", "ssn"),
    ("dob", "date_of_birth"),
    ("birthdate", "date_of_birth"),
    ("birth_date", "date_of_birth"),
    ("birthday", "date_of_birth"),
    ("e_mail", "email"),
    ("email_address", "email"),
    ("mail", "email"),
    ("phone_number", "phone"),
    ("telephone", "phone"),
    ("tel", "phone"),
    ("mobile", "phone"),
    ("cell", "phone"),
    ("cc", "credit_card"),
    ("ccn", "credit_card"),
    ("card_number", "credit_card"),
    ("credit_card_number", "credit_card"),
    ("addr", "address"),
    ("street_address", "address"),
    ("home_address", "address"),
    ("mailing_address", "address"),
];

/// Lower-cases, collapses non-alphanumeric runs to `_`, and resolves aliases.
pub fn normalize_field_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let collapsed = NON_ALNUM.replace_all(&lowered, "_");
    let collapsed = collapsed.trim_matches('_');

    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == collapsed)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| collapsed.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldSpecificity {
    Partial,
    Exact,
}

/// One row of the field category table.
pub struct FieldCategory {
    pub field: &'static str,
    pub kind: EntityKind,
    /// Name tokens that mark a partial field-name match.
    pub keywords: &'static [&'static str],
    pub value_shape: &'static str,
    pub validator: Option<fn(&str) -> bool>,
    pub exact_confidence: f64,
    pub partial_confidence: f64,
}

fn is_capitalized_phrase(value: &str) -> bool {
    value.split_whitespace().count() >= 2
}

pub static FIELD_CATEGORIES: &[FieldCategory] = &[
    FieldCategory {
        field: "ssn",
        kind: EntityKind::Ssn,
        keywords: &["ssn", "social"],
        value_shape: r"^\d{3}[-\s]?\d{2}[-\s]?\d{4}$",
        validator: Some(is_valid_ssn),
        exact_confidence: 0.99,
        partial_confidence: 0.90,
    },
    FieldCategory {
        field: "credit_card",
        kind: EntityKind::CreditCard,
        keywords: &["card", "credit", "ccn"],
        value_shape: r"^[\d\s-]{13,23}$",
        validator: Some(is_valid_credit_card),
        exact_confidence: 0.99,
        partial_confidence: 0.90,
    },
    FieldCategory {
        field: "email",
        kind: EntityKind::Email,
        keywords: &["email", "mail"],
        value_shape: r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$",
        validator: Some(is_valid_email),
        exact_confidence: 0.98,
        partial_confidence: 0.90,
    },
    FieldCategory {
        field: "date_of_birth",
        kind: EntityKind::DateOfBirth,
        keywords: &["birth", "dob"],
        value_shape: r"^[A-Za-z0-9 ,./-]{6,20}$",
        validator: Some(is_plausible_birth_date),
        exact_confidence: 0.98,
        partial_confidence: 0.88,
    },
    FieldCategory {
        field: "phone",
        kind: EntityKind::Phone,
        keywords: &["phone", "telephone", "tel", "mobile", "cell", "fax"],
        value_shape: r"^\+?[\d\s().-]{10,18}$",
        validator: Some(is_valid_phone),
        exact_confidence: 0.97,
        partial_confidence: 0.88,
    },
    FieldCategory {
        field: "address",
        kind: EntityKind::Address,
        keywords: &["address", "street", "addr"],
        value_shape: r"^\d+[A-Za-z]?\s+\S.*$",
        validator: None,
        exact_confidence: 0.95,
        partial_confidence: 0.85,
    },
    FieldCategory {
        field: "first_name",
        kind: EntityKind::PersonName,
        keywords: &["first", "given", "fname"],
        value_shape: r"^[A-Za-z][A-Za-z'.-]*$",
        validator: None,
        exact_confidence: 0.95,
        partial_confidence: 0.85,
    },
    FieldCategory {
        field: "last_name",
        kind: EntityKind::PersonName,
        keywords: &["last", "surname", "family", "lname"],
        value_shape: r"^[A-Za-z][A-Za-z' .-]*$",
        validator: None,
        exact_confidence: 0.95,
        partial_confidence: 0.85,
    },
    FieldCategory {
        field: "full_name",
        kind: EntityKind::PersonName,
        keywords: &["name"],
        value_shape: r"^[A-Z][A-Za-z'.-]*(?:\s+[A-Z][A-Za-z'.-]*)+$",
        validator: Some(is_capitalized_phrase),
        exact_confidence: 0.95,
        partial_confidence: 0.85,
    },
];

static COMPILED_VALUE_SHAPES: Lazy<Vec<Regex>> = Lazy::new(|| {
    FIELD_CATEGORIES
        .iter()
        .map(|c| Regex::new(c.value_shape).expect("built-in field value shapes are valid"))
        .collect()
});

/// Keywords match whole name tokens. Keywords of four or more letters also
/// match as a prefix or suffix of a token, as in `phonenumber` or `homephone`.
fn keyword_names_token(keyword: &str, token: &str) -> bool {
    token == keyword
        || (keyword.len() >= 4 && (token.starts_with(keyword) || token.ends_with(keyword)))
}

impl FieldCategory {
    /// How specifically `raw`/`normalized` names this category, if at all.
    pub fn specificity(&self, raw: &str, normalized: &str) -> Option<FieldSpecificity> {
        if normalized == self.field {
            return Some(FieldSpecificity::Exact);
        }
        let raw = raw.to_lowercase();
        let raw = NON_ALNUM.replace_all(&raw, "_");
        let mut tokens = raw.split('_').chain(normalized.split('_')).filter(|t| !t.is_empty());
        tokens
            .any(|token| self.keywords.iter().any(|k| keyword_names_token(k, token)))
            .then_some(FieldSpecificity::Partial)
    }

    pub fn confidence(&self, specificity: FieldSpecificity) -> f64 {
        match specificity {
            FieldSpecificity::Exact => self.exact_confidence,
            FieldSpecificity::Partial => self.partial_confidence,
        }
    }
}

/// A `field: value` pair with byte offsets of its value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub raw_name: String,
    pub name: String,
    pub value: String,
    pub value_start: usize,
    pub value_end: usize,
}

/// One `Record N:` block and the fields seen in it.
#[derive(Debug, Clone, Default)]
pub struct FieldRecord {
    pub index: Option<u32>,
    /// Fields in text order, with offsets. The matcher works from these.
    pub entries: Vec<FieldEntry>,
    /// Canonical field name to value, for callers that read records by
    /// field. A repeated field keeps its last value.
    pub fields: HashMap<String, String>,
}

impl FieldRecord {
    /// Looks a field up by any of its spellings, e.g. `"DOB"` or `"fname"`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(&normalize_field_name(name)).map(String::as_str)
    }
}

/// Splits text into records. Lines that are neither a header nor a
/// `field: value` pair are skipped.
pub fn parse_records(text: &str) -> Vec<FieldRecord> {
    let mut records: Vec<FieldRecord> = Vec::new();
    let mut current = FieldRecord::default();
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let content = line.trim_end_matches(['\n', '\r']);

        if let Some(caps) = RECORD_HEADER.captures(content) {
            if current.index.is_some() || !current.entries.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            current.index = caps[1].parse().ok();
            continue;
        }

        let Some(caps) = FIELD_LINE.captures(content) else {
            if !content.trim().is_empty() {
                debug!("Skipping unstructured line at offset {}", line_start);
            }
            continue;
        };
        let (Some(name), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };

        let entry = FieldEntry {
            raw_name: name.as_str().to_string(),
            name: normalize_field_name(name.as_str()),
            value: value.as_str().to_string(),
            value_start: line_start + value.start(),
            value_end: line_start + value.end(),
        };
        current.fields.insert(entry.name.clone(), entry.value.clone());
        current.entries.push(entry);
    }

    if current.index.is_some() || !current.entries.is_empty() {
        records.push(current);
    }
    records
}

/// Picks the best category for a field among `kinds`, returning it together
/// with the specificity of the name match.
fn best_category(
    entry: &FieldEntry,
    kinds: &[EntityKind],
) -> Option<(&'static FieldCategory, FieldSpecificity)> {
    FIELD_CATEGORIES
        .iter()
        .zip(COMPILED_VALUE_SHAPES.iter())
        .filter(|(category, _)| kinds.contains(&category.kind))
        .filter_map(|(category, shape)| {
            let specificity = category.specificity(&entry.raw_name, &entry.name)?;
            if !shape.is_match(&entry.value) {
                return None;
            }
            if let Some(validator) = category.validator {
                if !validator(&entry.value) {
                    return None;
                }
            }
            Some((category, specificity))
        })
        .max_by(|(a, sa), (b, sb)| {
            sa.cmp(sb).then(
                a.confidence(*sa)
                    .partial_cmp(&b.confidence(*sb))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        })
}

#[derive(Debug, Default)]
pub struct FieldMatcher;

impl FieldMatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn find_matches(&self, text: &str, pattern: &Pattern, kinds: &[EntityKind]) -> Vec<Match> {
        let mut matches = Vec::new();
        if kinds.is_empty() {
            return matches;
        }

        for record in parse_records(text) {
            for entry in &record.entries {
                let Some((category, specificity)) = best_category(entry, kinds) else {
                    continue;
                };
                if entry.value_start >= entry.value_end {
                    continue;
                }

                let reason = match record.index {
                    Some(index) => format!("record {} field '{}'", index, entry.raw_name),
                    None => format!("field '{}'", entry.raw_name),
                };
                matches.push(
                    Match::new(
                        text,
                        entry.value_start,
                        entry.value_end,
                        MatchMethod::Field,
                        category.confidence(specificity),
                        pattern,
                    )
                    .with_entity(Some(category.kind))
                    .with_label(category.field)
                    .with_reason(reason),
                );
            }
        }

        debug!("Field matcher found {} matches for pattern '{}'", matches.len(), pattern.id);
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternCategory;

    fn all_kinds() -> Vec<EntityKind> {
        EntityKind::ALL.to_vec()
    }

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("First Name"), "first_name");
        assert_eq!(normalize_field_name("fname"), "first_name");
        assert_eq!(normalize_field_name("Social-Security"), "ssn");
        assert_eq!(normalize_field_name("  E-Mail  "), "email");
        assert_eq!(normalize_field_name("Customer__ID"), "customer_id");
    }

    #[test]
    fn test_parse_records() {
        let text = "Record 1:\nfirst_name: John\nssn: 123-45-6789\n\nRecord 2:\nemail: a@b.com\n";
        let records = parse_records(text);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].index, Some(1));
        assert_eq!(records[0].fields.get("first_name"), Some(&"John".to_string()));
        assert_eq!(records[1].entries.len(), 1);

        let entry = &records[0].entries[1];
        assert_eq!(&text[entry.value_start..entry.value_end], "123-45-6789");
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let text = "Record 1:\nthis line has no separator\n: orphan value\nemail:\nphone: 555-123-4567\n";
        let records = parse_records(text);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entries.len(), 1);
        assert_eq!(records[0].entries[0].name, "phone");
    }

    #[test]
    fn test_record_scenario() {
        let text = "Record 1:\nfirst_name: John\nssn: 123-45-6789\n";
        let pattern = Pattern::new("people", PatternCategory::Pii);
        let matches = FieldMatcher::new().find_matches(text, &pattern, &all_kinds());

        assert_eq!(matches.len(), 2);

        assert_eq!(matches[0].text, "John");
        assert_eq!(matches[0].label.as_deref(), Some("first_name"));
        assert!((matches[0].confidence - 0.95).abs() < 1e-9);

        assert_eq!(matches[1].text, "123-45-6789");
        assert_eq!(matches[1].label.as_deref(), Some("ssn"));
        assert!((matches[1].confidence - 0.99).abs() < 1e-9);
        assert!(matches.iter().all(|m| m.method == MatchMethod::Field));
    }

    #[test]
    fn test_partial_field_names_score_lower() {
        let text = "Record 7:\nemployee ssn #: 234-56-7890\nwork email: jane@corp.com\n";
        let pattern = Pattern::new("hr", PatternCategory::Pii);
        let matches = FieldMatcher::new().find_matches(text, &pattern, &all_kinds());

        assert_eq!(matches.len(), 2);
        assert!((matches[0].confidence - 0.90).abs() < 1e-9);
        assert!((matches[1].confidence - 0.90).abs() < 1e-9);
        assert_eq!(matches[0].reason.as_deref(), Some("record 7 field 'employee ssn #'"));
    }

    #[test]
    fn test_value_must_validate() {
        let text = "Record 1:\nssn: 000-12-3456\ncard_number: 4111 1111 1111 1112\ndob: 1850-01-01\n";
        let pattern = Pattern::new("p", PatternCategory::Pii);
        let matches = FieldMatcher::new().find_matches(text, &pattern, &all_kinds());

        assert!(matches.is_empty());
    }

    #[test]
    fn test_confidence_ignores_value_content() {
        let pattern = Pattern::new("p", PatternCategory::Financial);
        let a = FieldMatcher::new().find_matches("card_number: 4111111111111111\n", &pattern, &all_kinds());
        let b = FieldMatcher::new().find_matches("card_number: 5500 0000 0000 0004\n", &pattern, &all_kinds());

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a[0].confidence, b[0].confidence);
    }

    #[test]
    fn test_kinds_restrict_categories() {
        let text = "Record 1:\nfirst_name: John\nssn: 123-45-6789\n";
        let pattern = Pattern::new("ssn", PatternCategory::Pii);
        let matches = FieldMatcher::new().find_matches(text, &pattern, &[EntityKind::Ssn]);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].entity, Some(EntityKind::Ssn));
    }

    #[test]
    fn test_generic_name_field_requires_full_name() {
        let text = "name: Widget\nname: Jane Doe\n";
        let pattern = Pattern::new("p", PatternCategory::Pii);
        let matches = FieldMatcher::new().find_matches(text, &pattern, &[EntityKind::PersonName]);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].text, "Jane Doe");
        assert!((matches[0].confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_keywords_match_whole_tokens() {
        let pattern = Pattern::new("p", PatternCategory::Pii);
        let text = "cancellation fee: 555-123-4567\nhotel: 555-123-4567\nmobile phone: 555-123-4567\nhomephone: 555-123-4567\n";
        let matches = FieldMatcher::new().find_matches(text, &pattern, &all_kinds());

        let reasons: Vec<_> = matches.iter().filter_map(|m| m.reason.as_deref()).collect();
        assert_eq!(reasons, vec!["field 'mobile phone'", "field 'homephone'"]);
        assert!(matches.iter().all(|m| (m.confidence - 0.88).abs() < 1e-9));
    }

    #[test]
    fn test_record_field_lookup() {
        let records = parse_records("Record 3:\nDate of Birth: 1985-04-12\nFName: Ada\n");

        assert_eq!(records[0].get("DOB"), Some("1985-04-12"));
        assert_eq!(records[0].get("first name"), Some("Ada"));
        assert_eq!(records[0].get("ssn"), None);
    }

    #[test]
    fn test_crlf_offsets() {
        let text = "Record 1:\r\nemail: john@example.com\r\n";
        let pattern = Pattern::new("p", PatternCategory::Pii);
        let matches = FieldMatcher::new().find_matches(text, &pattern, &all_kinds());

        assert_eq!(matches.len(), 1);
        assert_eq!(&text[matches[0].start..matches[0].end], "john@example.com");
    }
}

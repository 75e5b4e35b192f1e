//! Format validators shared by inference and the context/field matchers

use chrono::{Datelike, NaiveDate, Utc};

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d.%m.%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
];

pub fn digits_of(value: &str) -> Vec<u32> {
    value.chars().filter_map(|c| c.to_digit(10)).collect()
}

/// Luhn checksum over the digits of `number`, ignoring separators.
pub fn luhn_check(number: &str) -> bool {
    let digits = digits_of(number);
    if digits.is_empty() {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// Digit-only card check: 13 to 19 digits, separators limited to spaces and
/// dashes, and a passing Luhn sum.
pub fn is_valid_credit_card(value: &str) -> bool {
    if !value.chars().all(|c| c.is_ascii_digit() || c == ' ' || c == '-') {
        return false;
    }
    let count = digits_of(value).len();
    (13..=19).contains(&count) && luhn_check(value)
}

/// SSN digit rules: area not 000, 666 or 9xx; group not 00; serial not 0000.
pub fn is_valid_ssn(value: &str) -> bool {
    if !value.chars().all(|c| c.is_ascii_digit() || c == '-' || c == ' ') {
        return false;
    }
    let digits = digits_of(value);
    if digits.len() != 9 {
        return false;
    }

    let area = digits[0] * 100 + digits[1] * 10 + digits[2];
    let group = digits[3] * 10 + digits[4];
    let serial = digits[5] * 1000 + digits[6] * 100 + digits[7] * 10 + digits[8];

    area != 0 && area != 666 && area < 900 && group != 0 && serial != 0
}

/// North-American style numbers: 10 digits, or 11 with a leading 1.
pub fn is_valid_phone(value: &str) -> bool {
    let digits = digits_of(value);
    match digits.len() {
        10 => digits[0] >= 2,
        11 => digits[0] == 1 && digits[1] >= 2,
        _ => false,
    }
}

pub fn is_valid_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain
            .rsplit_once('.')
            .map(|(_, tld)| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
            .unwrap_or(false)
}

/// Parses any of the supported date layouts into a calendar-valid date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim().trim_end_matches('.');
    let normalized = trimmed.replace("Sept ", "Sep ");
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(&normalized, format).ok())
}

pub fn is_valid_date(value: &str) -> bool {
    parse_date(value).is_some()
}

/// A calendar-valid date whose year is in [1900, current year + 1].
pub fn is_plausible_birth_date(value: &str) -> bool {
    let current_year = Utc::now().year();
    parse_date(value)
        .map(|date| (1900..=current_year + 1).contains(&date.year()))
        .unwrap_or(false)
}

//! Overlap resolution between matches from all strategies

use crate::pattern::{Match, Pattern};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

/// Drops matches whose text is one of their own pattern's exclusions.
///
/// `extra` holds exclusions read from a store, keyed by pattern id, and is
/// consulted alongside the pattern's `excluded_examples`.
pub fn filter_excluded(
    matches: Vec<Match>,
    patterns: &[Pattern],
    extra: &HashMap<String, Vec<String>>,
) -> Vec<Match> {
    let by_id: HashMap<&str, &Pattern> = patterns.iter().map(|p| (p.id.as_str(), p)).collect();
    let before = matches.len();

    let kept: Vec<Match> = matches
        .into_iter()
        .filter(|m| {
            let in_pattern = by_id
                .get(m.pattern_id.as_str())
                .map_or(false, |p| p.is_excluded(&m.text));
            let in_store = extra
                .get(&m.pattern_id)
                .map_or(false, |texts| texts.iter().any(|t| t == &m.text));
            !(in_pattern || in_store)
        })
        .collect();

    if kept.len() != before {
        debug!("Excluded {} matches", before - kept.len());
    }
    kept
}

fn arbitration_order(a: &Match, b: &Match) -> Ordering {
    a.start
        .cmp(&b.start)
        .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal))
        .then_with(|| b.len().cmp(&a.len()))
}

/// Reduces `matches` to an interval-disjoint set.
///
/// Candidates are visited by start, then confidence, then length. A candidate
/// that overlaps the last kept match replaces it only with strictly higher
/// confidence.
pub fn arbitrate(mut matches: Vec<Match>) -> Vec<Match> {
    matches.sort_by(arbitration_order);

    let mut kept: Vec<Match> = Vec::with_capacity(matches.len());
    for candidate in matches {
        match kept.last_mut() {
            Some(last) if last.overlaps(&candidate) => {
                if candidate.confidence > last.confidence {
                    *last = candidate;
                }
            }
            _ => kept.push(candidate),
        }
    }

    debug_assert!(kept.windows(2).all(|w| w[0].end <= w[1].start));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{MatchMethod, PatternCategory};

    const TEXT: &str = "call 555-123-4567 or write to jane@example.com now";

    fn pattern(id: &str) -> Pattern {
        Pattern::new(id, PatternCategory::Pii)
    }

    fn m(start: usize, end: usize, confidence: f64, id: &str) -> Match {
        Match::new(TEXT, start, end, MatchMethod::Regex, confidence, &pattern(id))
    }

    #[test]
    fn test_disjoint_matches_are_kept() {
        let result = arbitrate(vec![m(30, 46, 0.9, "email"), m(5, 17, 0.8, "phone")]);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].start, 5);
        assert_eq!(result[1].start, 30);
    }

    #[test]
    fn test_higher_confidence_wins_overlap() {
        let result = arbitrate(vec![m(5, 17, 0.7, "a"), m(9, 17, 0.95, "b")]);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].pattern_id, "b");
    }

    #[test]
    fn test_equal_confidence_keeps_earlier() {
        let result = arbitrate(vec![m(9, 17, 0.9, "late"), m(5, 17, 0.9, "early")]);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].pattern_id, "early");
    }

    #[test]
    fn test_longest_wins_exact_tie() {
        let result = arbitrate(vec![m(5, 12, 0.9, "short"), m(5, 17, 0.9, "long")]);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].pattern_id, "long");
    }

    #[test]
    fn test_output_is_interval_disjoint() {
        let result = arbitrate(vec![
            m(0, 10, 0.6, "a"),
            m(5, 20, 0.8, "b"),
            m(8, 30, 0.7, "c"),
            m(15, 40, 0.95, "d"),
            m(41, 46, 0.5, "e"),
        ]);

        for pair in result.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        assert!(result.iter().any(|r| r.pattern_id == "d"));
    }

    #[test]
    fn test_filter_excluded_uses_pattern_and_store() {
        let patterns = vec![
            Pattern::new("phone", PatternCategory::Pii).with_excluded(["555-123-4567"]),
            pattern("email"),
        ];
        let mut extra = HashMap::new();
        extra.insert("email".to_string(), vec!["jane@example.com".to_string()]);

        let matches = vec![m(5, 17, 0.9, "phone"), m(30, 46, 0.9, "email"), m(0, 4, 0.9, "email")];
        let kept = filter_excluded(matches, &patterns, &extra);

        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].text, "call");
    }

    #[test]
    fn test_exclusion_is_per_pattern_and_exact() {
        let patterns = vec![Pattern::new("phone", PatternCategory::Pii).with_excluded(["555-123-4567"])];
        let matches = vec![m(5, 17, 0.9, "other"), m(5, 12, 0.9, "phone")];
        let kept = filter_excluded(matches, &patterns, &HashMap::new());

        assert_eq!(kept.len(), 2);
    }
}

use redactkit_core::{
    infer_pattern, Config, DetectionEngine, MatchMethod, MemoryExclusionStore, OllamaConfig, Pattern,
    PatternCategory, PatternSet, RedactionPolicy, RedactionStyle,
};
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_public_pipeline() {
    let engine = DetectionEngine::from_config(&Config::default())
        .with_exclusion_store(Arc::new(MemoryExclusionStore::new()));
    let patterns = vec![
        Pattern::new("ssn", PatternCategory::Pii),
        Pattern::new("employee_id", PatternCategory::Custom).with_examples(["EMP-1042", "EMP-2231"]),
    ];

    let result = engine
        .detect("Employee EMP-7781 has SSN 234-56-7890.", &patterns)
        .await;

    assert_eq!(result.statistics.total_matches, 2);
    assert_eq!(result.statistics.per_method_counts.get(&MatchMethod::Regex), Some(&1));
    assert_eq!(result.redacted_text, "Employee ******** has SSN [PII-1].");
}

#[test]
fn test_pattern_set_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("patterns.toml");
    let set = PatternSet {
        patterns: vec![Pattern::new("codename", PatternCategory::Classification)
            .with_examples(["Project Phoenix"])
            .with_context_keywords(["codename"])],
    };

    set.to_file(&path).unwrap();
    let loaded = PatternSet::from_file(&path).unwrap();

    assert_eq!(loaded.patterns.len(), 1);
    assert_eq!(loaded.patterns[0].examples, vec!["Project Phoenix"]);
    assert_eq!(loaded.patterns[0].confidence_threshold, 0.7);

    let result = DetectionEngine::new()
        .with_redaction_policy(RedactionPolicy::uniform(RedactionStyle::full("[{category}]")))
        .detect_local("Status of Project Phoenix", &loaded.patterns);
    assert_eq!(result.redacted_text, "Status of [classification]");
}

#[test]
fn test_module_exports() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert!(!OllamaConfig::default().enabled);

    let inferred = infer_pattern(&["123-45-6789".to_string()]).unwrap();
    assert!(regex::Regex::new(&inferred.regex).is_ok());
}

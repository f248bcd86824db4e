use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use remedy_types::{
    DetectedError, ErrorCategory, ErrorSeverity, Field, FixAction, FixPattern, MatchExpr,
    RiskLevel,
};

use crate::{FixCatalog, Matcher};

fn pattern(id: &str, confidence: f64, rules: Vec<MatchExpr>) -> FixPattern {
    FixPattern {
        id: id.to_string(),
        name: format!("pattern {id}"),
        categories: vec![ErrorCategory::Security],
        severities: vec![ErrorSeverity::High, ErrorSeverity::Medium],
        match_rules: rules,
        actions: vec![FixAction::RunCommand {
            command: "true".to_string(),
            timeout_secs: None,
        }],
        confidence,
        validation_required: false,
        risk: RiskLevel::Low,
        reversible: true,
    }
}

fn security_error(message: &str) -> DetectedError {
    DetectedError {
        id: "err-1".to_string(),
        category: ErrorCategory::Security,
        severity: ErrorSeverity::High,
        artifact: PathBuf::from("config.json"),
        message: message.to_string(),
        trace: None,
        context: HashMap::new(),
    }
}

fn contains(needle: &str) -> MatchExpr {
    MatchExpr::Contains {
        field: Field::Message,
        needle: needle.to_string(),
    }
}

#[test]
fn add_remove_list_by_id() {
    let catalog = FixCatalog::new();
    catalog.add(pattern("sec-001", 0.9, vec![])).expect("add");
    catalog.add(pattern("sec-002", 0.8, vec![])).expect("add");
    assert_eq!(catalog.len(), 2);

    let ids: Vec<_> = catalog
        .list()
        .iter()
        .map(|e| e.pattern.id.clone())
        .collect();
    assert_eq!(ids, vec!["sec-001", "sec-002"]);

    catalog.remove("sec-001").expect("remove");
    assert!(catalog.get("sec-001").is_none());
    assert!(catalog.remove("sec-001").is_err());
}

#[test]
fn duplicate_and_invalid_entries_rejected() {
    let catalog = FixCatalog::new();
    catalog.add(pattern("sec-001", 0.9, vec![])).expect("add");
    assert!(catalog.add(pattern("sec-001", 0.9, vec![])).is_err());

    assert!(catalog.add(pattern("bad-conf", 1.5, vec![])).is_err());

    let bad_regex = pattern(
        "bad-regex",
        0.5,
        vec![MatchExpr::Regex {
            field: Field::Message,
            pattern: "(unclosed".to_string(),
        }],
    );
    assert!(catalog.add(bad_regex).is_err());
}

#[test]
fn category_severity_and_message_hit_sum_to_ten() {
    // security category (+3), high severity in {high, medium} (+2),
    // one message expression hit (+5) => 10, weighted by confidence 1.0.
    let catalog = Arc::new(FixCatalog::new());
    catalog
        .add(pattern("sec-005", 1.0, vec![contains("insecure file permissions")]))
        .expect("add");

    let matcher = Matcher::new(catalog);
    let error = security_error("insecure file permissions 777 on config.json");

    let ranked = matcher.find_candidates(&error);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].pattern.pattern.id, "sec-005");
    assert_eq!(ranked[0].score, 10);
    assert!((ranked[0].weight - 10.0).abs() < f64::EPSILON);
}

#[test]
fn zero_score_patterns_excluded() {
    let catalog = Arc::new(FixCatalog::new());
    let mut unrelated = pattern("dep-001", 1.0, vec![contains("missing dependency")]);
    unrelated.categories = vec![ErrorCategory::Dependency];
    unrelated.severities = vec![ErrorSeverity::Low];
    catalog.add(unrelated).expect("add");

    let matcher = Matcher::new(catalog);
    let ranked = matcher.find_candidates(&security_error("insecure file permissions"));
    assert!(ranked.is_empty());
}

#[test]
fn confidence_breaks_equal_scores() {
    // Identical match results; higher confidence must never rank below
    // lower confidence.
    let catalog = Arc::new(FixCatalog::new());
    catalog
        .add(pattern("low-conf", 0.4, vec![contains("permissions")]))
        .expect("add");
    catalog
        .add(pattern("high-conf", 0.9, vec![contains("permissions")]))
        .expect("add");

    let matcher = Matcher::new(catalog);
    let ranked = matcher.find_candidates(&security_error("insecure file permissions"));
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].pattern.pattern.id, "high-conf");
    assert_eq!(ranked[1].pattern.pattern.id, "low-conf");
}

#[test]
fn confidence_outweighs_single_strong_hit() {
    // 7 raw points at 1.0 confidence beats 10 raw points at 0.5.
    let catalog = Arc::new(FixCatalog::new());
    let mut no_rule_hit = pattern("steady", 1.0, vec![]);
    no_rule_hit.severities = vec![ErrorSeverity::High];
    catalog.add(no_rule_hit).expect("add"); // 3 + 2 = 5 * 1.0 = 5.0
    catalog
        .add(pattern("flaky", 0.4, vec![contains("permissions")]))
        .expect("add"); // 10 * 0.4 = 4.0

    let matcher = Matcher::new(catalog);
    let ranked = matcher.find_candidates(&security_error("insecure file permissions"));
    assert_eq!(ranked[0].pattern.pattern.id, "steady");
}

#[test]
fn ties_keep_insertion_order() {
    let catalog = Arc::new(FixCatalog::new());
    catalog
        .add(pattern("first", 0.8, vec![contains("permissions")]))
        .expect("add");
    catalog
        .add(pattern("second", 0.8, vec![contains("permissions")]))
        .expect("add");

    let matcher = Matcher::new(catalog);
    let ranked = matcher.find_candidates(&security_error("insecure file permissions"));
    assert_eq!(ranked[0].pattern.pattern.id, "first");
    assert_eq!(ranked[1].pattern.pattern.id, "second");
}

#[test]
fn trace_hits_score_lower_than_message_hits() {
    let catalog = Arc::new(FixCatalog::new());
    catalog
        .add(pattern(
            "trace-rule",
            1.0,
            vec![MatchExpr::Contains {
                field: Field::Trace,
                needle: "stack overflow".to_string(),
            }],
        ))
        .expect("add");

    let matcher = Matcher::new(catalog);
    let mut error = security_error("something unrelated");
    error.trace = Some("stack overflow at frame 3".to_string());

    let ranked = matcher.find_candidates(&error);
    // 3 (category) + 2 (severity) + 2 (trace hit) = 7
    assert_eq!(ranked[0].score, 7);
}

#[test]
fn removal_does_not_invalidate_held_candidates() {
    let catalog = Arc::new(FixCatalog::new());
    catalog
        .add(pattern("sec-005", 1.0, vec![contains("permissions")]))
        .expect("add");

    let matcher = Matcher::new(Arc::clone(&catalog));
    let ranked = matcher.find_candidates(&security_error("insecure file permissions"));
    catalog.remove("sec-005").expect("remove");

    // The in-flight candidate still resolves through its Arc snapshot.
    assert_eq!(ranked[0].pattern.pattern.id, "sec-005");
    assert!(catalog.is_empty());
}

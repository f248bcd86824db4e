use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use remedy_types::{
    ActionStatus, DetectedError, ErrorCategory, ErrorSeverity, FixAction, FixPattern, RiskLevel,
    TargetRef,
};
use serde_json::json;

use crate::{Applier, ApplyError, InsertionPolicy};

fn applier() -> Applier {
    Applier::new(Duration::from_secs(10), InsertionPolicy::ImportAware)
}

fn pattern_with(id: &str, actions: Vec<FixAction>) -> FixPattern {
    FixPattern {
        id: id.to_string(),
        name: format!("pattern {id}"),
        categories: vec![ErrorCategory::Security],
        severities: vec![ErrorSeverity::High],
        match_rules: vec![],
        actions,
        confidence: 1.0,
        validation_required: false,
        risk: RiskLevel::Low,
        reversible: true,
    }
}

fn detected(artifact: &Path) -> DetectedError {
    DetectedError {
        id: "err-1".to_string(),
        category: ErrorCategory::Security,
        severity: ErrorSeverity::High,
        artifact: artifact.to_path_buf(),
        message: "insecure file permissions 777 on config.json".to_string(),
        trace: None,
        context: HashMap::new(),
    }
}

#[tokio::test]
async fn replace_applies_then_reports_noop_on_second_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("config.json");
    tokio::fs::write(&file, r#"{"mode": "777"}"#).await.expect("write");

    let pattern = pattern_with(
        "sec-005",
        vec![FixAction::ReplaceInFile {
            target: file.clone(),
            find: "\"777\"".to_string(),
            replace: "\"644\"".to_string(),
            is_regex: false,
        }],
    );
    let error = detected(&file);

    let first = applier().apply(&pattern, &error, false).await.expect("apply");
    assert_eq!(first.outcomes[0].status, ActionStatus::Applied);
    assert!(first.mutated());

    // Idempotence: the same fix against the already-fixed target must
    // report no-op, never a duplicate mutation.
    let second = applier().apply(&pattern, &error, false).await.expect("apply");
    assert_eq!(second.outcomes[0].status, ActionStatus::NoOp);
    assert!(!second.mutated());

    let content = tokio::fs::read_to_string(&file).await.expect("read");
    assert_eq!(content, r#"{"mode": "644"}"#);
}

#[tokio::test]
async fn regex_replace_rewrites_all_matches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("main.rs");
    tokio::fs::write(&file, "let a = foo(1);\nlet b = foo(2);\n")
        .await
        .expect("write");

    let pattern = pattern_with(
        "rt-001",
        vec![FixAction::ReplaceInFile {
            target: file.clone(),
            find: r"foo\((\d)\)".to_string(),
            replace: "bar($1)".to_string(),
            is_regex: true,
        }],
    );

    applier()
        .apply(&pattern, &detected(&file), false)
        .await
        .expect("apply");
    let content = tokio::fs::read_to_string(&file).await.expect("read");
    assert_eq!(content, "let a = bar(1);\nlet b = bar(2);\n");
}

#[tokio::test]
async fn delete_absent_file_is_noop() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("never-existed.tmp");

    let pattern = pattern_with(
        "cleanup",
        vec![FixAction::DeleteFile {
            target: file.clone(),
        }],
    );

    let applied = applier()
        .apply(&pattern, &detected(&file), false)
        .await
        .expect("apply");
    assert_eq!(applied.outcomes[0].status, ActionStatus::NoOp);
}

#[tokio::test]
async fn failed_command_aborts_remaining_actions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("after.txt");

    let pattern = pattern_with(
        "sec-005",
        vec![
            FixAction::RunCommand {
                command: "exit 3".to_string(),
                timeout_secs: None,
            },
            FixAction::InsertInFile {
                target: file.clone(),
                content: "must not be written".to_string(),
            },
        ],
    );

    let err = applier()
        .apply(&pattern, &detected(&file), false)
        .await
        .expect_err("non-zero exit is a hard failure");
    let ApplyError::ActionFailed {
        index, completed, ..
    } = err;
    assert_eq!(index, 0);
    assert!(completed.is_empty());
    assert!(!file.exists(), "actions after the failure must not run");
}

#[tokio::test]
async fn command_timeout_is_a_failure() {
    let applier = Applier::new(Duration::from_millis(200), InsertionPolicy::ImportAware);
    let dir = tempfile::tempdir().expect("tempdir");

    let pattern = pattern_with(
        "slow",
        vec![FixAction::RunCommand {
            command: "sleep 5".to_string(),
            timeout_secs: None,
        }],
    );

    let err = applier
        .apply(&pattern, &detected(dir.path()), false)
        .await
        .expect_err("timeout must fail the action");
    let ApplyError::ActionFailed { detail, .. } = err;
    assert!(detail.contains("timed out"), "got: {detail}");
}

#[tokio::test]
async fn update_config_key_creates_intermediates_and_noops_when_set() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("app.json");
    tokio::fs::write(&file, "{}").await.expect("write");

    let pattern = pattern_with(
        "cfg-001",
        vec![FixAction::UpdateConfigKey {
            target: file.clone(),
            key: "server.tls.enabled".to_string(),
            value: json!(true),
        }],
    );

    let first = applier()
        .apply(&pattern, &detected(&file), false)
        .await
        .expect("apply");
    assert_eq!(first.outcomes[0].status, ActionStatus::Applied);

    let raw = tokio::fs::read_to_string(&file).await.expect("read");
    let value = remedy_types::confdoc::get_key(&file, &raw, "server.tls.enabled").expect("get");
    assert_eq!(value, Some(json!(true)));

    let second = applier()
        .apply(&pattern, &detected(&file), false)
        .await
        .expect("apply");
    assert_eq!(second.outcomes[0].status, ActionStatus::NoOp);
}

#[tokio::test]
async fn insert_uses_import_aware_policy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("main.py");
    tokio::fs::write(&file, "import os\n\nprint('hi')\n")
        .await
        .expect("write");

    let pattern = pattern_with(
        "dep-004",
        vec![FixAction::InsertInFile {
            target: file.clone(),
            content: "import sys".to_string(),
        }],
    );

    applier()
        .apply(&pattern, &detected(&file), false)
        .await
        .expect("apply");
    let content = tokio::fs::read_to_string(&file).await.expect("read");
    assert_eq!(content, "import os\nimport sys\n\nprint('hi')\n");

    // Second run finds the content already present.
    let second = applier()
        .apply(&pattern, &detected(&file), false)
        .await
        .expect("apply");
    assert_eq!(second.outcomes[0].status, ActionStatus::NoOp);
}

#[tokio::test]
async fn dry_run_plans_everything_and_touches_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("config.json");
    tokio::fs::write(&file, r#"{"mode": "777"}"#).await.expect("write");

    let pattern = pattern_with(
        "sec-005",
        vec![
            FixAction::ReplaceInFile {
                target: file.clone(),
                find: "\"777\"".to_string(),
                replace: "\"644\"".to_string(),
                is_regex: false,
            },
            FixAction::RunCommand {
                command: "exit 1".to_string(),
                timeout_secs: None,
            },
        ],
    );

    let planned = applier()
        .apply(&pattern, &detected(&file), true)
        .await
        .expect("dry run never executes the failing command");
    assert_eq!(planned.outcomes.len(), 2);
    assert!(planned
        .outcomes
        .iter()
        .all(|o| o.status == ActionStatus::Planned));
    assert!(!planned.mutated());

    let content = tokio::fs::read_to_string(&file).await.expect("read");
    assert_eq!(content, r#"{"mode": "777"}"#, "dry run must not mutate");
}

#[test]
fn preview_reports_kinds_and_targets() {
    let file = PathBuf::from("config.json");
    let pattern = pattern_with(
        "sec-005",
        vec![
            FixAction::ReplaceInFile {
                target: file.clone(),
                find: "777".to_string(),
                replace: "644".to_string(),
                is_regex: false,
            },
            FixAction::RunCommand {
                command: "chmod 644 config.json".to_string(),
                timeout_secs: None,
            },
        ],
    );

    let planned = applier().preview(&pattern);
    assert_eq!(planned.len(), 2);
    assert_eq!(planned[0].kind, "replace_in_file");
    assert_eq!(
        planned[0].target,
        Some(TargetRef::File { path: file })
    );
    assert_eq!(planned[1].kind, "run_command");
    assert!(planned[1].target.is_none());
}

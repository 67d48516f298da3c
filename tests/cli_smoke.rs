//! Smoke tests for the `ndh-telemetry` binary.

mod common;

use serde_json::Value;

fn json_line(stdout: &str) -> Value {
    let line = stdout.lines().last().expect("at least one output line");
    serde_json::from_str(line).expect("stdout line is JSON")
}

#[test]
fn help_lists_commands() {
    let result = common::run_cli_case("help_lists_commands", &["--help"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    for command in ["serve", "ingest", "summary", "export", "config"] {
        assert!(result.stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn ingest_then_summary_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = common::write_config(dir.path());
    let config = config.to_str().expect("utf-8 path");

    for succeeded in ["true", "true", "true", "false"] {
        let payload = format!(r#"{{"type":"download","dataset":"HBN","succeeded":{succeeded}}}"#);
        let result = common::run_cli_case_with_stdin(
            "ingest_download",
            &["--config", config, "--json", "ingest"],
            Some(payload.as_bytes()),
        );
        assert!(result.status.success(), "log: {}", result.log_path.display());
        assert_eq!(json_line(&result.stdout)["status"], "ok");
    }

    let result = common::run_cli_case("summary_json", &["--config", config, "--json", "summary"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let summary = json_line(&result.stdout);
    assert_eq!(summary["counts"]["per_dataset"]["HBN"]["success"], 3);
    assert_eq!(summary["counts"]["per_dataset"]["HBN"]["fail"], 1);
    assert_eq!(summary["total_events"], 4);

    let activity = std::fs::read_to_string(dir.path().join("activity.jsonl")).expect("activity log");
    assert_eq!(activity.lines().count(), 4);
}

#[test]
fn ingest_from_file_argument() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = common::write_config(dir.path());
    let payload = dir.path().join("event.json");
    std::fs::write(&payload, r#"{"type":"feedback_log_followup","original_rating":"Poor"}"#)
        .expect("write payload");

    let result = common::run_cli_case(
        "ingest_file",
        &[
            "--config",
            config.to_str().expect("utf-8 path"),
            "--json",
            "ingest",
            payload.to_str().expect("utf-8 path"),
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert_eq!(json_line(&result.stdout)["total_events"], 1);
}

#[test]
fn rejected_payload_exits_nonzero_with_reason() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = common::write_config(dir.path());

    let result = common::run_cli_case_with_stdin(
        "ingest_invalid",
        &["--config", config.to_str().expect("utf-8 path"), "--json", "ingest"],
        Some(br#"{"type":"heartbeat"}"#),
    );
    assert_eq!(result.status.code(), Some(1));
    assert_eq!(json_line(&result.stdout)["reason"], "invalid_type");
    assert!(result.stderr.contains("ndh-telemetry:"));
    assert!(!dir.path().join("telemetry.json").exists());
}

#[test]
fn export_writes_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = common::write_config(dir.path());
    let config = config.to_str().expect("utf-8 path");

    let ingest = common::run_cli_case_with_stdin(
        "export_seed",
        &["--config", config, "--json", "ingest"],
        Some(br#"{"type":"feedback","feedback_level":"quick","feedback_rating":"Good"}"#),
    );
    assert!(ingest.status.success(), "log: {}", ingest.log_path.display());

    let result = common::run_cli_case("export", &["--config", config, "--json", "export"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let report = json_line(&result.stdout);
    assert_eq!(report["events_written"], 1);
    assert!(dir.path().join("export.sqlite3").exists());
}

#[test]
fn config_show_reports_hash_and_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = common::write_config(dir.path());

    let result = common::run_cli_case(
        "config_show",
        &["--config", config.to_str().expect("utf-8 path"), "--json", "config", "--show"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = json_line(&result.stdout);
    assert_eq!(payload["exists"], true);
    assert!(payload["hash"].as_str().is_some_and(|h| !h.is_empty()));
    assert_eq!(payload["config"]["ingest"]["rate_limit_max_events"], 100);
}

#[test]
fn missing_explicit_config_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.toml");
    let result = common::run_cli_case(
        "missing_config",
        &["--config", missing.to_str().expect("utf-8 path"), "summary"],
    );
    assert_eq!(result.status.code(), Some(1));
    assert!(result.stderr.contains("NDH-1002"));
}

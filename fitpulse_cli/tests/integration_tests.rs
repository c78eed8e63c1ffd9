//! Integration tests for the fitpulse binary.
//!
//! These tests verify end-to-end behavior including:
//! - Recording workouts and updating the durable aggregate
//! - Stats display
//! - Drift correction via forced reconciliation
//! - Recovery from corrupted data files

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a test data directory
fn setup_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("fitpulse"))
}

fn record_run(data_dir: &std::path::Path, minutes: &str, kcal: &str, xp: &str) {
    cli()
        .arg("record")
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--workout")
        .arg("run")
        .arg("--minutes")
        .arg(minutes)
        .arg("--kcal")
        .arg(kcal)
        .arg("--xp")
        .arg(xp)
        .assert()
        .success()
        .stdout(predicate::str::contains("Workout recorded"));
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "FitPulse workout sync and reconciliation",
        ));
}

#[test]
fn test_record_creates_data_files() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    record_run(&data_dir, "30", "250", "40");

    assert!(data_dir.join("workouts.jsonl").exists());
    assert!(data_dir.join("aggregate.json").exists());

    let contents = fs::read_to_string(data_dir.join("workouts.jsonl")).unwrap();
    assert_eq!(contents.lines().count(), 1);
    assert!(contents.contains("\"run\""));
}

#[test]
fn test_record_then_stats_shows_totals() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    record_run(&data_dir, "30", "250", "40");
    record_run(&data_dir, "20", "150", "25");

    // Stats runs in a fresh process; totals must come from the durable aggregate
    cli()
        .arg("stats")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Workouts: 2"))
        .stdout(predicate::str::contains("XP:       65"));
}

#[test]
fn test_stats_on_empty_data_dir() {
    let temp_dir = setup_test_dir();

    cli()
        .arg("stats")
        .arg("--data-dir")
        .arg(temp_dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Workouts: 0"));
}

#[test]
fn test_forced_reconcile_corrects_tampered_aggregate() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    record_run(&data_dir, "30", "250", "40");
    record_run(&data_dir, "20", "150", "25");

    // Simulate drift: the durable counters no longer match the records
    fs::write(
        data_dir.join("aggregate.json"),
        r#"{"total_xp":9999,"total_workouts":50,"current_streak":0,"last_workout_at":null}"#,
    )
    .unwrap();

    cli()
        .arg("reconcile")
        .arg("--force")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Drift corrected"))
        .stdout(predicate::str::contains("Workouts: 50 → 2"))
        .stdout(predicate::str::contains("XP:       9999 → 65"));

    cli()
        .arg("stats")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Workouts: 2"))
        .stdout(predicate::str::contains("XP:       65"));
}

#[test]
fn test_reconcile_clean_when_no_drift() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    record_run(&data_dir, "30", "250", "40");

    cli()
        .arg("reconcile")
        .arg("--force")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("no drift"));
}

#[test]
fn test_reconcile_respects_cadence() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    record_run(&data_dir, "10", "80", "10");

    // First unforced pass runs (never reconciled before)
    cli()
        .arg("reconcile")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();

    // Second unforced pass is skipped until the cadence elapses
    cli()
        .arg("reconcile")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("not due"));
}

#[test]
fn test_corrupted_record_line_skipped_during_reconcile() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    record_run(&data_dir, "30", "250", "40");

    // Simulate a crash mid-append: a torn line at the end of the record log
    let log_path = data_dir.join("workouts.jsonl");
    let mut contents = fs::read_to_string(&log_path).unwrap();
    contents.push_str("{ torn json line\n");
    fs::write(&log_path, contents).unwrap();

    cli()
        .arg("reconcile")
        .arg("--force")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success();

    cli()
        .arg("stats")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Workouts: 1"));
}

#[test]
fn test_record_huge_minutes_does_not_overflow() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    // u32::MAX minutes: the seconds conversion must saturate, not panic
    cli()
        .arg("record")
        .arg("--data-dir")
        .arg(&data_dir)
        .arg("--workout")
        .arg("walk")
        .arg("--minutes")
        .arg("4294967295")
        .arg("--kcal")
        .arg("100")
        .arg("--xp")
        .arg("10")
        .assert()
        .success()
        .stdout(predicate::str::contains("Workout recorded"));
}

#[test]
fn test_corrupted_aggregate_recovered_by_reconcile() {
    let temp_dir = setup_test_dir();
    let data_dir = temp_dir.path().to_path_buf();

    record_run(&data_dir, "30", "250", "40");

    fs::write(data_dir.join("aggregate.json"), "{ invalid json }}}}").unwrap();

    // A corrupted aggregate reads as empty; reconciliation rebuilds it
    cli()
        .arg("reconcile")
        .arg("--force")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Drift corrected"));

    cli()
        .arg("stats")
        .arg("--data-dir")
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Workouts: 1"))
        .stdout(predicate::str::contains("XP:       40"));
}

//! Command-line behaviour of the `rejoin` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn write_scenario(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("scenario.toml");
    let toml = format!(
        r#"
[worker]
command = "{worker}"
stop_grace_ms = 1000

[cluster]
resilience_dir = "{res}"

[delivery]
sequence_length = 40
send_interval_ms = 10
settle_delay_ms = 100

[timeouts]
readiness_secs = 10
delivery_secs = 10
validation_secs = 10
recovery_marker_secs = 5
"#,
        worker = env!("CARGO_BIN_EXE_fake-worker"),
        res = dir.join("res-data").display(),
    );
    std::fs::write(&path, toml).unwrap();
    path
}

#[test]
fn expect_prints_payload_and_frame() {
    Command::cargo_bin("rejoin")
        .unwrap()
        .args(["expect", "--last", "200", "--width", "6"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[200,198,196,194,192,190]"))
        .stdout(predicate::str::contains("framed:  000000195b323030"));
}

#[test]
fn expect_rejects_unfillable_window() {
    Command::cargo_bin("rejoin")
        .unwrap()
        .args(["expect", "--last", "4", "--width", "6"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot fill a window"));
}

#[test]
fn run_passes_with_fake_worker() {
    let tmp = tempfile::tempdir().unwrap();
    let scenario = write_scenario(tmp.path());

    Command::cargo_bin("rejoin")
        .unwrap()
        .args(["run", "--config"])
        .arg(&scenario)
        .assert()
        .success()
        .stdout(predicate::str::contains("Scenario: COMPLETE"))
        .stdout(predicate::str::contains("validating -> complete"))
        .stdout(predicate::str::contains("[40,38,36,34,32,30]"));
}

#[test]
fn run_json_report() {
    let tmp = tempfile::tempdir().unwrap();
    let scenario = write_scenario(tmp.path());

    let output = Command::cargo_bin("rejoin")
        .unwrap()
        .args(["run", "--json", "--config"])
        .arg(&scenario)
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["passed"], true);
    assert_eq!(report["state"], "complete");
    assert_eq!(report["delivered"], 40);
    assert_eq!(report["transitions"].as_array().unwrap().len(), 4);
    assert!(report["error"].is_null());
}

#[test]
fn run_exits_nonzero_on_launch_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let scenario = write_scenario(tmp.path());

    Command::cargo_bin("rejoin")
        .unwrap()
        .args(["run", "--command", "/nonexistent/worker-binary", "--config"])
        .arg(&scenario)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Scenario: FAILED"))
        .stdout(predicate::str::contains("(launch)"));
}

#[test]
fn run_reports_unreadable_config() {
    Command::cargo_bin("rejoin")
        .unwrap()
        .args(["run", "--config", "/nonexistent/scenario.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config file"));
}

#[test]
fn run_rejects_single_worker() {
    let tmp = tempfile::tempdir().unwrap();
    let scenario = write_scenario(tmp.path());

    Command::cargo_bin("rejoin")
        .unwrap()
        .args(["run", "--workers", "1", "--config"])
        .arg(&scenario)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("(config)"));
}

//! End-to-end tests for the `canwatch` binary's one-shot subcommands.

use std::path::Path;
use std::time::Duration;

use assert_cmd::Command;
use chrono::{TimeZone, Utc};

use canwatch::catalog::SignalSpec;
use canwatch::detector::{Fault, FaultKind, Severity};
use canwatch::ledger::{FaultLedger, FaultRecord};

/// Binary invocation isolated from any config in the working directory.
fn canwatch(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("canwatch").expect("binary built");
    cmd.current_dir(dir)
        .env("CANWATCH_CONFIG", dir.join("absent.toml"))
        .env_remove("CANWATCH_LOG_FILE")
        .env_remove("CANWATCH_LEDGER_FILE")
        .env_remove("CANWATCH_TIMEOUT_SECS")
        .env_remove("CANWATCH_SUMMARY_INTERVAL_SECS");
    cmd
}

#[test]
fn faults_without_ledger_fails() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = canwatch(dir.path())
        .args(["faults", "--faultlog"])
        .arg(dir.path().join("missing.csv"))
        .output()
        .expect("run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found"), "{stderr}");
}

#[test]
fn faults_prints_ledger_as_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger_path = dir.path().join("fault_log.csv");
    let spec = SignalSpec {
        id: "0x102".to_owned(),
        name: "RPM".to_owned(),
        unit: "rpm".to_owned(),
        min: 800.0,
        max: 6000.0,
        max_silence: Duration::from_secs(3),
        dtc: None,
    };
    let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date");
    let mut ledger = FaultLedger::create(&ledger_path).expect("ledger");
    ledger
        .append(&FaultRecord::new(
            &spec,
            Fault {
                kind: FaultKind::Timeout,
                severity: Severity::Critical,
                details: "Timeout on RPM (0x102)".to_owned(),
            },
            at,
        ))
        .expect("append");

    let output = canwatch(dir.path())
        .args(["faults", "--faultlog"])
        .arg(&ledger_path)
        .output()
        .expect("run");

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json stdout");
    let entries = json.as_array().expect("array");
    assert_eq!(entries.len(), 1);
    let entry = entries.first().expect("entry");
    assert_eq!(entry["CAN_ID"], "0x102");
    assert_eq!(entry["Fault_Type"], "Timeout");
    assert_eq!(entry["Severity"], "Critical");
}

#[test]
fn check_lists_default_catalog() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = canwatch(dir.path()).arg("check").output().expect("run");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for id in ["0x101", "0x102", "0x103"] {
        assert!(stdout.contains(id), "{stdout}");
    }
    assert!(stdout.contains("Ledger:"), "{stdout}");
}

#[test]
fn check_rejects_invalid_config() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("bad.toml");
    std::fs::write(
        &config,
        "[[signals]]\nid = \"0x1\"\nname = \"X\"\nmin = 5.0\nmax = 1.0\n",
    )
    .expect("write config");

    canwatch(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("check")
        .assert()
        .failure();
}

#[test]
fn simulate_writes_requested_cycles() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("sim.csv");

    canwatch(dir.path())
        .args(["simulate", "--count", "2", "--cadence-millis", "10", "--seed", "5"])
        .arg("--logfile")
        .arg(&log)
        .timeout(Duration::from_secs(30))
        .assert()
        .success();

    let contents = std::fs::read_to_string(&log).expect("read log");
    assert_eq!(contents.lines().count(), 1 + 2 * 3);
}

#[test]
fn malformed_env_timeout_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = canwatch(dir.path())
        .env("CANWATCH_TIMEOUT_SECS", "abc")
        .arg("check")
        .output()
        .expect("run");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("CANWATCH_TIMEOUT_SECS"), "{stderr}");
    assert!(stderr.contains("abc"), "{stderr}");
}

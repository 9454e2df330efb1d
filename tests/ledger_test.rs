//! Tests for the append-only fault ledger.

use std::time::Duration;

use chrono::{TimeZone, Utc};

use canwatch::catalog::SignalSpec;
use canwatch::detector::{Fault, FaultKind, Severity};
use canwatch::ledger::{read_ledger, FaultLedger, FaultRecord, LedgerError, LEDGER_HEADER};

fn speed() -> SignalSpec {
    SignalSpec {
        id: "0x101".to_owned(),
        name: "Speed".to_owned(),
        unit: "km/h".to_owned(),
        min: 0.0,
        max: 160.0,
        max_silence: Duration::from_secs(3),
        dtc: None,
    }
}

fn record(details: &str) -> FaultRecord {
    let at = Utc
        .with_ymd_and_hms(2024, 1, 1, 12, 30, 0)
        .single()
        .expect("date");
    FaultRecord::new(
        &speed(),
        Fault {
            kind: FaultKind::OutOfRange,
            severity: Severity::Critical,
            details: details.to_owned(),
        },
        at,
    )
}

#[test]
fn create_writes_header_only() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fault_log.csv");

    let ledger = FaultLedger::create(&path).expect("create");
    assert_eq!(ledger.appended(), 0);
    assert_eq!(ledger.path(), path.as_path());

    let contents = std::fs::read_to_string(&path).expect("read");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines, vec![LEDGER_HEADER.join(",")]);
}

#[test]
fn create_truncates_previous_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fault_log.csv");
    std::fs::write(&path, "stale,contents\nfrom,before\n").expect("seed");

    FaultLedger::create(&path).expect("create");

    let entries = read_ledger(&path).expect("read");
    assert!(entries.is_empty());
}

#[test]
fn create_makes_parent_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("deeper").join("fault_log.csv");

    FaultLedger::create(&path).expect("create");
    assert!(path.exists());
}

#[test]
fn appended_records_are_readable_immediately() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fault_log.csv");
    let mut ledger = FaultLedger::create(&path).expect("create");

    ledger
        .append(&record("Speed (0x101) value 200 km/h above max by 40"))
        .expect("append");
    assert_eq!(ledger.appended(), 1);

    // Read while the ledger is still open.
    let entries = read_ledger(&path).expect("read");
    assert_eq!(entries.len(), 1);
    let entry = entries.first().expect("entry");
    assert_eq!(entry.timestamp, "2024-01-01T12:30:00.000Z");
    assert_eq!(entry.can_id, "0x101");
    assert_eq!(entry.signal, "Speed");
    assert_eq!(entry.fault_type, "OutOfRange");
    assert_eq!(entry.severity, "Critical");
}

#[test]
fn details_with_commas_and_quotes_survive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fault_log.csv");
    let mut ledger = FaultLedger::create(&path).expect("create");
    let details = "value 200, limit \"160\"";

    ledger.append(&record(details)).expect("append");

    let entries = read_ledger(&path).expect("read");
    assert_eq!(entries.first().map(|e| e.details.as_str()), Some(details));
}

#[test]
fn records_keep_append_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fault_log.csv");
    let mut ledger = FaultLedger::create(&path).expect("create");

    for n in 0..3 {
        ledger.append(&record(&format!("fault {n}"))).expect("append");
    }

    let details: Vec<String> = read_ledger(&path)
        .expect("read")
        .into_iter()
        .map(|entry| entry.details)
        .collect();
    assert_eq!(details, vec!["fault 0", "fault 1", "fault 2"]);
}

#[test]
fn missing_ledger_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.csv");

    let err = read_ledger(&path).expect_err("missing");
    assert!(matches!(err, LedgerError::NotFound { .. }));
    assert!(err.to_string().contains("not found"));
}

#[test]
fn entries_serialize_with_ledger_column_names() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fault_log.csv");
    let mut ledger = FaultLedger::create(&path).expect("create");
    ledger.append(&record("x")).expect("append");

    let entries = read_ledger(&path).expect("read");
    let json = serde_json::to_value(&entries).expect("json");
    let first = json.get(0).expect("first entry");
    for column in LEDGER_HEADER {
        assert!(first.get(column).is_some(), "missing {column}");
    }
}

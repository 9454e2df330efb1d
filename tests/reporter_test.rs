//! Tests for diagnostic summaries and the summary interval.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

use canwatch::catalog::{SignalCatalog, SignalSpec};
use canwatch::reporter::{render, SignalStatus, SummaryReporter};
use canwatch::state::SignalStates;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date")
}

fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

fn catalog() -> SignalCatalog {
    let spec = |id: &str, name: &str| SignalSpec {
        id: id.to_owned(),
        name: name.to_owned(),
        unit: String::new(),
        min: 0.0,
        max: 100.0,
        max_silence: Duration::from_secs(4),
        dtc: None,
    };
    SignalCatalog::new(vec![
        spec("0x101", "Speed"),
        spec("0x102", "RPM"),
        spec("0x103", "Temp"),
    ])
    .expect("catalog")
}

#[test]
fn statuses_reflect_silence() {
    let catalog = catalog();
    let mut states = SignalStates::new(&catalog);
    states.record_reading("0x101", t0() + secs(8)).expect("record");
    states.record_reading("0x102", t0()).expect("record");

    let summary = render(&catalog, &states, t0() + secs(10));

    assert_eq!(summary.status_of("0x101"), Some(SignalStatus::Ok));
    assert_eq!(summary.status_of("0x102"), Some(SignalStatus::Timeout));
    assert_eq!(summary.status_of("0x103"), Some(SignalStatus::NeverReceived));
    assert_eq!(summary.lines.len(), 3);
}

#[test]
fn refreshed_signal_still_reports_timeout() {
    let catalog = catalog();
    let mut states = SignalStates::new(&catalog);
    states.record_reading("0x101", t0()).expect("record");
    states.refresh("0x101", t0() + secs(5)).expect("refresh");

    let summary = render(&catalog, &states, t0() + secs(6));

    assert_eq!(summary.status_of("0x101"), Some(SignalStatus::Timeout));
    let line = summary.lines.first().expect("line");
    assert_eq!(line.silence, Some(Duration::from_secs(6)));
}

#[test]
fn rendering_leaves_state_untouched() {
    let catalog = catalog();
    let mut states = SignalStates::new(&catalog);
    states.record_reading("0x102", t0()).expect("record");
    states.record_fault("0x102").expect("fault");
    let before = states.get("0x102").copied();

    let summary = render(&catalog, &states, t0() + secs(30));

    assert_eq!(states.get("0x102").copied(), before);
    assert_eq!(summary.total_faults(), 1);
}

#[test]
fn summary_text_lists_every_signal() {
    let catalog = catalog();
    let mut states = SignalStates::new(&catalog);
    states.record_reading("0x101", t0()).expect("record");
    states.record_fault("0x101").expect("fault");

    let text = render(&catalog, &states, t0() + secs(2)).to_string();

    assert!(text.starts_with("==== Diagnostic Summary ===="));
    assert!(text.contains("   Speed (0x101): OK"), "{text}");
    assert!(text.contains("Faults: 1"), "{text}");
    assert!(text.contains("Last: 2.0s ago"), "{text}");
    assert!(text.contains("Never Received"), "{text}");
    assert!(text.contains("Last: never"), "{text}");
    assert!(text.ends_with(&"=".repeat(30)));
}

#[test]
fn reporter_fires_once_per_interval() {
    let catalog = catalog();
    let states = SignalStates::new(&catalog);
    let mut reporter = SummaryReporter::new(Duration::from_secs(30), t0());

    assert!(!reporter.is_due(t0() + secs(29)));
    assert!(reporter.poll(&catalog, &states, t0() + secs(29)).is_none());

    let summary = reporter
        .poll(&catalog, &states, t0() + secs(30))
        .expect("due at interval");
    assert_eq!(summary.generated_at, t0() + secs(30));

    assert!(reporter.poll(&catalog, &states, t0() + secs(31)).is_none());
    assert!(reporter.poll(&catalog, &states, t0() + secs(60)).is_some());
}

#[test]
fn clock_going_backwards_is_not_due() {
    let reporter = SummaryReporter::new(Duration::from_secs(30), t0());
    assert!(!reporter.is_due(t0() - secs(60)));
}

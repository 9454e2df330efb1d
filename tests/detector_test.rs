//! Tests for the range and timeout checks.

use std::time::Duration;

use chrono::{TimeZone, Utc};

use canwatch::catalog::SignalSpec;
use canwatch::detector::{check_range, check_timeout, FaultKind, Severity};

const MARGIN: f64 = 20.0;

fn speed() -> SignalSpec {
    SignalSpec {
        id: "0x101".to_owned(),
        name: "Speed".to_owned(),
        unit: "km/h".to_owned(),
        min: 0.0,
        max: 160.0,
        max_silence: Duration::from_secs(3),
        dtc: Some("P0500".to_owned()),
    }
}

fn severity_at(value: f64) -> Option<Severity> {
    check_range(&speed(), value, MARGIN).map(|fault| fault.severity)
}

// ---------------------------------------------------------------------------
// check_range
// ---------------------------------------------------------------------------

#[test]
fn in_range_values_pass() {
    assert_eq!(severity_at(150.0), None);
    assert_eq!(severity_at(0.0), None, "min is inclusive");
    assert_eq!(severity_at(160.0), None, "max is inclusive");
}

#[test]
fn small_excursions_are_warnings() {
    assert_eq!(severity_at(161.0), Some(Severity::Warning));
    assert_eq!(severity_at(170.0), Some(Severity::Warning));
}

// The margin is symmetric: -5 sits 5 below min, inside the 20 margin, so it
// is a Warning rather than Critical.
#[test]
fn small_excursion_below_min_is_warning_not_critical() {
    assert_eq!(severity_at(-5.0), Some(Severity::Warning));
}

#[test]
fn excursion_equal_to_margin_is_still_a_warning() {
    assert_eq!(severity_at(180.0), Some(Severity::Warning));
    assert_eq!(severity_at(-20.0), Some(Severity::Warning));
}

#[test]
fn excursions_beyond_margin_are_critical() {
    assert_eq!(severity_at(181.0), Some(Severity::Critical));
    assert_eq!(severity_at(200.0), Some(Severity::Critical));
    assert_eq!(severity_at(-25.0), Some(Severity::Critical));
}

#[test]
fn range_fault_details_name_signal_and_bound() {
    let fault = check_range(&speed(), 200.0, MARGIN).expect("fault");
    assert_eq!(fault.kind, FaultKind::OutOfRange);
    assert!(fault.details.contains("Speed (0x101)"), "{}", fault.details);
    assert!(fault.details.contains("above max by 40"), "{}", fault.details);
    assert!(fault.details.ends_with("[DTC P0500]"), "{}", fault.details);

    let below = check_range(&speed(), -5.0, MARGIN).expect("fault");
    assert!(below.details.contains("below min by 5"), "{}", below.details);
}

#[test]
fn range_fault_without_dtc_has_no_suffix() {
    let spec = SignalSpec {
        dtc: None,
        ..speed()
    };
    let fault = check_range(&spec, 170.0, MARGIN).expect("fault");
    assert!(!fault.details.contains("DTC"));
}

// ---------------------------------------------------------------------------
// check_timeout
// ---------------------------------------------------------------------------

#[test]
fn never_seen_signal_never_times_out() {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date");
    assert!(check_timeout(&speed(), now, None).is_none());
}

#[test]
fn silence_equal_to_limit_does_not_fire() {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date");
    let now = t0 + chrono::Duration::seconds(3);
    assert!(check_timeout(&speed(), now, Some(t0)).is_none());
}

#[test]
fn silence_beyond_limit_fires_critical() {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date");
    let now = t0 + chrono::Duration::milliseconds(3_500);

    let fault = check_timeout(&speed(), now, Some(t0)).expect("timeout");
    assert_eq!(fault.kind, FaultKind::Timeout);
    assert_eq!(fault.severity, Severity::Critical);
    assert!(
        fault
            .details
            .starts_with("Timeout on Speed (0x101): no message in 3.5 seconds"),
        "{}",
        fault.details
    );
    assert!(fault.details.contains("limit 3.0"), "{}", fault.details);
}

#[test]
fn reading_in_the_future_does_not_fire() {
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("date");
    let later = now + chrono::Duration::seconds(60);
    assert!(check_timeout(&speed(), now, Some(later)).is_none());
}

#[test]
fn fault_names_match_ledger_vocabulary() {
    assert_eq!(FaultKind::Timeout.to_string(), "Timeout");
    assert_eq!(FaultKind::OutOfRange.to_string(), "OutOfRange");
    assert_eq!(Severity::Warning.to_string(), "Warning");
    assert_eq!(Severity::Critical.to_string(), "Critical");
}

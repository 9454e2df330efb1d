//! Fault classification.
//!
//! Both checks are pure: the same spec, state, and input always give the
//! same answer. Callers own the follow-up (ledger append, counters, and the
//! `last_seen` refresh after a timeout).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::SignalSpec;

/// Fault class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// No reading within the signal's max silence.
    Timeout,
    /// Reading outside the signal's valid envelope.
    OutOfRange,
}

impl FaultKind {
    /// Name as written to the ledger.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "Timeout",
            Self::OutOfRange => "OutOfRange",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fault severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    /// Out of range, but within the tolerance margin.
    Warning,
    /// Timeouts, and range excursions beyond the margin.
    Critical,
}

impl Severity {
    /// Name as written to the ledger.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected fault, before it is attributed a timestamp and written.
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    /// Fault class.
    pub kind: FaultKind,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub details: String,
}

/// Check a value against the signal's envelope.
///
/// Fires when `value` is below `min` or above `max`. The fault is critical
/// when the excursion past the violated bound is strictly greater than
/// `margin`.
pub fn check_range(spec: &SignalSpec, value: f64, margin: f64) -> Option<Fault> {
    let (excursion, bound) = if value > spec.max {
        (value - spec.max, "above max")
    } else if value < spec.min {
        (spec.min - value, "below min")
    } else {
        return None;
    };

    let severity = if excursion > margin {
        Severity::Critical
    } else {
        Severity::Warning
    };

    Some(Fault {
        kind: FaultKind::OutOfRange,
        severity,
        details: with_dtc(
            spec,
            format!(
                "{name} ({id}) value {value} {unit} {bound} by {excursion} (valid {min}..={max})",
                name = spec.name,
                id = spec.id,
                unit = spec.unit,
                min = spec.min,
                max = spec.max,
            ),
        ),
    })
}

/// Check whether the signal has been silent for longer than allowed.
///
/// Signals that were never seen are exempt. Timeouts are always critical.
pub fn check_timeout(
    spec: &SignalSpec,
    now: DateTime<Utc>,
    last_seen: Option<DateTime<Utc>>,
) -> Option<Fault> {
    let last_seen = last_seen?;
    let elapsed = now.signed_duration_since(last_seen);
    // A limit beyond chrono's range can never be exceeded.
    let limit = chrono::Duration::from_std(spec.max_silence).ok()?;
    if elapsed <= limit {
        return None;
    }

    let elapsed_secs = elapsed.to_std().map(|d| d.as_secs_f64()).unwrap_or_default();
    Some(Fault {
        kind: FaultKind::Timeout,
        severity: Severity::Critical,
        details: with_dtc(
            spec,
            format!(
                "Timeout on {name} ({id}): no message in {elapsed_secs:.1} seconds (limit {limit:.1})",
                name = spec.name,
                id = spec.id,
                limit = spec.max_silence.as_secs_f64(),
            ),
        ),
    })
}

fn with_dtc(spec: &SignalSpec, details: String) -> String {
    match &spec.dtc {
        Some(dtc) => format!("{details} [DTC {dtc}]"),
        None => details,
    }
}

//! Periodic liveness and fault summaries.
//!
//! Summaries are observational only: rendering reads the catalog and signal
//! states and never changes them. [`SummaryReporter`] tracks when the last
//! summary went out so the engine can ask on every tick whether one is due.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::catalog::SignalCatalog;
use crate::state::SignalStates;

/// Liveness of one signal at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    /// No reading since startup.
    NeverReceived,
    /// Silent for longer than the signal's max silence.
    Timeout,
    /// Reporting within its cadence.
    Ok,
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NeverReceived => "Never Received",
            Self::Timeout => "Timeout",
            Self::Ok => "OK",
        })
    }
}

/// One row of a summary.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryLine {
    /// Bus id.
    pub signal_id: String,
    /// Signal name.
    pub name: String,
    /// Liveness.
    pub status: SignalStatus,
    /// Faults attributed to the signal so far.
    pub fault_count: u64,
    /// Time since the last actual reading, if any.
    pub silence: Option<Duration>,
}

/// A rendered summary across all signals, in catalog order.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Render time.
    pub generated_at: DateTime<Utc>,
    /// One line per catalog signal.
    pub lines: Vec<SummaryLine>,
}

impl Summary {
    /// Faults across all signals.
    pub fn total_faults(&self) -> u64 {
        self.lines
            .iter()
            .fold(0_u64, |total, line| total.saturating_add(line.fault_count))
    }

    /// Status of one signal, if it is in the summary.
    pub fn status_of(&self, signal_id: &str) -> Option<SignalStatus> {
        self.lines
            .iter()
            .find(|line| line.signal_id == signal_id)
            .map(|line| line.status)
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== Diagnostic Summary ====")?;
        for line in &self.lines {
            let last = match line.silence {
                Some(silence) => format!("{:.1}s ago", silence.as_secs_f64()),
                None => "never".to_owned(),
            };
            writeln!(
                f,
                "{name:>8} ({id}): {status:<14} | Faults: {faults:<4} | Last: {last}",
                name = line.name,
                id = line.signal_id,
                status = line.status.to_string(),
                faults = line.fault_count,
            )?;
        }
        write!(f, "{}", "=".repeat(30))
    }
}

/// Render the current status of every catalog signal.
pub fn render(catalog: &SignalCatalog, states: &SignalStates, now: DateTime<Utc>) -> Summary {
    let lines = catalog
        .iter()
        .map(|spec| {
            let state = states.get(&spec.id).copied().unwrap_or_default();
            // Clock skew can put a reading in the future; treat it as fresh.
            let silence = state
                .last_reading
                .map(|at| now.signed_duration_since(at).to_std().unwrap_or_default());
            let status = match silence {
                None => SignalStatus::NeverReceived,
                Some(silence) if silence > spec.max_silence => SignalStatus::Timeout,
                Some(_) => SignalStatus::Ok,
            };
            SummaryLine {
                signal_id: spec.id.clone(),
                name: spec.name.clone(),
                status,
                fault_count: state.fault_count,
                silence,
            }
        })
        .collect();

    Summary {
        generated_at: now,
        lines,
    }
}

/// Decides when a summary is due and renders it.
#[derive(Debug, Clone)]
pub struct SummaryReporter {
    interval: Duration,
    last_rendered: DateTime<Utc>,
}

impl SummaryReporter {
    /// Create a reporter whose first summary is due one interval after
    /// `started_at`.
    pub fn new(interval: Duration, started_at: DateTime<Utc>) -> Self {
        Self {
            interval,
            last_rendered: started_at,
        }
    }

    /// Whether a summary is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_rendered)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.interval)
    }

    /// Render a summary if one is due, and restart the interval.
    pub fn poll(
        &mut self,
        catalog: &SignalCatalog,
        states: &SignalStates,
        now: DateTime<Utc>,
    ) -> Option<Summary> {
        if !self.is_due(now) {
            return None;
        }
        self.last_rendered = now;
        Some(render(catalog, states, now))
    }
}

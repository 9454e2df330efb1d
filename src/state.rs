//! Per-signal liveness and fault tracking.
//!
//! One [`SignalState`] exists for every catalog entry from startup until the
//! process exits. The map is closed: readings for ids outside the catalog are
//! rejected with [`UnknownSignal`] rather than creating new entries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::catalog::SignalCatalog;

/// Mutable tracker for one signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalState {
    /// Reference point for the timeout check. Set by each reading and
    /// pushed forward when a timeout fires, so one silence period reports
    /// once.
    pub last_seen: Option<DateTime<Utc>>,
    /// Timestamp of the most recent actual reading. Not moved by timeouts.
    pub last_reading: Option<DateTime<Utc>>,
    /// Faults attributed to this signal during the run.
    pub fault_count: u64,
}

/// A signal id that is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown signal id {0}")]
pub struct UnknownSignal(pub String);

/// The engine's exclusive collection of signal states.
#[derive(Debug, Clone)]
pub struct SignalStates {
    states: HashMap<String, SignalState>,
}

impl SignalStates {
    /// Create an entry for every catalog signal, none seen yet.
    pub fn new(catalog: &SignalCatalog) -> Self {
        let states = catalog
            .iter()
            .map(|spec| (spec.id.clone(), SignalState::default()))
            .collect();
        Self { states }
    }

    /// State for one signal.
    pub fn get(&self, id: &str) -> Option<&SignalState> {
        self.states.get(id)
    }

    /// Record a reading: both `last_seen` and `last_reading` become `at`.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownSignal`] for ids outside the catalog.
    pub fn record_reading(&mut self, id: &str, at: DateTime<Utc>) -> Result<(), UnknownSignal> {
        let state = self.entry(id)?;
        state.last_seen = Some(at);
        state.last_reading = Some(at);
        Ok(())
    }

    /// Count one fault and return the new total for the signal.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownSignal`] for ids outside the catalog.
    pub fn record_fault(&mut self, id: &str) -> Result<u64, UnknownSignal> {
        let state = self.entry(id)?;
        state.fault_count = state.fault_count.saturating_add(1);
        Ok(state.fault_count)
    }

    /// Move the timeout reference point to `now` after a timeout fired.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownSignal`] for ids outside the catalog.
    pub fn refresh(&mut self, id: &str, now: DateTime<Utc>) -> Result<(), UnknownSignal> {
        self.entry(id)?.last_seen = Some(now);
        Ok(())
    }

    /// Faults across all signals.
    pub fn total_faults(&self) -> u64 {
        self.states
            .values()
            .fold(0_u64, |total, state| total.saturating_add(state.fault_count))
    }

    /// Number of tracked signals.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether no signals are tracked.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn entry(&mut self, id: &str) -> Result<&mut SignalState, UnknownSignal> {
        self.states
            .get_mut(id)
            .ok_or_else(|| UnknownSignal(id.to_owned()))
    }
}

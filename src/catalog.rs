//! Static signal catalog.
//!
//! Maps each bus id to its name, unit, valid envelope, and expected max
//! silence. Built once at startup and never mutated; iteration follows the
//! configured order so summaries stay stable between runs.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;

use crate::config::MonitorConfig;

/// Immutable description of one monitored signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSpec {
    /// Bus identifier as it appears in the log.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Physical unit.
    pub unit: String,
    /// Lowest valid value.
    pub min: f64,
    /// Highest valid value.
    pub max: f64,
    /// Longest tolerated gap between readings.
    pub max_silence: Duration,
    /// Diagnostic trouble code, if one is assigned.
    pub dtc: Option<String>,
}

/// Two catalog entries shared an id.
#[derive(Debug, thiserror::Error)]
#[error("duplicate signal id {0}")]
pub struct DuplicateSignal(pub String);

/// Closed set of signals known to the engine.
#[derive(Debug, Clone)]
pub struct SignalCatalog {
    specs: Vec<SignalSpec>,
    index: HashMap<String, usize>,
}

impl SignalCatalog {
    /// Build a catalog, rejecting duplicate ids.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateSignal`] if two specs share an id.
    pub fn new(specs: Vec<SignalSpec>) -> Result<Self, DuplicateSignal> {
        let mut index = HashMap::with_capacity(specs.len());
        for (position, spec) in specs.iter().enumerate() {
            if index.insert(spec.id.clone(), position).is_some() {
                return Err(DuplicateSignal(spec.id.clone()));
            }
        }
        Ok(Self { specs, index })
    }

    /// Build the catalog from `[[signals]]`, applying the global default
    /// timeout where a signal has none.
    ///
    /// # Errors
    ///
    /// Returns an error if a timeout is not a valid duration or ids repeat.
    pub fn from_config(config: &MonitorConfig) -> anyhow::Result<Self> {
        let default_timeout = config.default_timeout()?;
        let specs = config
            .signals
            .iter()
            .map(|signal| {
                let max_silence = match signal.max_silence_secs {
                    Some(secs) => Duration::try_from_secs_f64(secs).with_context(|| {
                        format!("signal {} max_silence_secs is not a valid duration", signal.id)
                    })?,
                    None => default_timeout,
                };
                Ok(SignalSpec {
                    id: signal.id.clone(),
                    name: signal.name.clone(),
                    unit: signal.unit.clone(),
                    min: signal.min,
                    max: signal.max,
                    max_silence,
                    dtc: signal.dtc.clone(),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::new(specs)?)
    }

    /// Look up a signal by bus id.
    pub fn get(&self, id: &str) -> Option<&SignalSpec> {
        self.index.get(id).and_then(|&position| self.specs.get(position))
    }

    /// Whether the id belongs to the catalog.
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Signals in configured order.
    pub fn iter(&self) -> impl Iterator<Item = &SignalSpec> {
        self.specs.iter()
    }

    /// Number of signals.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether the catalog has no signals.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

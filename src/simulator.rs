//! Producer simulator for demos and manual testing.
//!
//! Writes the log header, then one row per catalog signal per cycle with a
//! value drawn uniformly from the signal's range. Values can be pushed out of
//! range at a configurable rate and chosen signals can be kept silent to
//! provoke timeouts.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::catalog::{SignalCatalog, SignalSpec};
use crate::config::SimulatorConfig;
use crate::tailer::LOG_HEADER;

/// Largest distance an injected out-of-range value lands past its bound.
const MAX_INJECTED_EXCURSION: f64 = 50.0;

/// One generated log row.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedRow {
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// Bus id.
    pub signal_id: String,
    /// Signal name.
    pub signal: String,
    /// Value encoded as two big-endian bytes in hex, empty if it does not fit.
    pub data_bytes: String,
    /// Whole-number value.
    pub value: f64,
    /// Physical unit.
    pub unit: String,
}

/// Appends simulated rows to a signal log.
pub struct Simulator {
    path: PathBuf,
    writer: csv::Writer<fs::File>,
    specs: Vec<SignalSpec>,
    silent: HashSet<String>,
    out_of_range_probability: f64,
    rng: StdRng,
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("path", &self.path)
            .field("signals", &self.specs.len())
            .field("silent", &self.silent)
            .finish()
    }
}

impl Simulator {
    /// Create (or truncate) the log and write its header.
    ///
    /// A `seed` makes the generated values reproducible.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be created or written.
    pub fn create(
        path: &Path,
        catalog: &SignalCatalog,
        settings: &SimulatorConfig,
        seed: Option<u64>,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = fs::File::create(path)
            .with_context(|| format!("failed to create log at {}", path.display()))?;

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut simulator = Self {
            path: path.to_path_buf(),
            writer: csv::Writer::from_writer(file),
            specs: catalog.iter().cloned().collect(),
            silent: settings.silent_signals.iter().cloned().collect(),
            out_of_range_probability: settings.out_of_range_probability,
            rng,
        };
        simulator
            .writer
            .write_record(LOG_HEADER)
            .context("failed to write log header")?;
        simulator.writer.flush().context("failed to flush log")?;
        Ok(simulator)
    }

    /// Write one row for every non-silent signal and flush.
    ///
    /// # Errors
    ///
    /// Returns an error if a row cannot be written.
    pub fn write_cycle(&mut self, now: DateTime<Utc>) -> anyhow::Result<Vec<SimulatedRow>> {
        let specs: Vec<SignalSpec> = self
            .specs
            .iter()
            .filter(|spec| !self.silent.contains(&spec.id))
            .cloned()
            .collect();

        let mut rows = Vec::with_capacity(specs.len());
        for spec in &specs {
            let row = self.generate(spec, now);
            // The producer writes local wall-clock time without an offset.
            let timestamp = row
                .timestamp
                .with_timezone(&Local)
                .naive_local()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string();
            let value = row.value.to_string();
            self.writer
                .write_record([
                    timestamp.as_str(),
                    row.signal_id.as_str(),
                    row.signal.as_str(),
                    row.data_bytes.as_str(),
                    value.as_str(),
                    row.unit.as_str(),
                ])
                .with_context(|| format!("failed to append to {}", self.path.display()))?;
            rows.push(row);
        }
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))?;
        Ok(rows)
    }

    /// Generate a row for one signal without writing it.
    pub fn generate(&mut self, spec: &SignalSpec, now: DateTime<Utc>) -> SimulatedRow {
        let inject = self.out_of_range_probability > 0.0
            && self.rng.gen_bool(self.out_of_range_probability);
        let raw = if inject {
            let excursion = self.rng.gen_range(1.0..=MAX_INJECTED_EXCURSION);
            if self.rng.gen_bool(0.5) {
                spec.max + excursion
            } else {
                spec.min - excursion
            }
        } else {
            self.rng.gen_range(spec.min..=spec.max)
        };
        let rounded = raw.round();
        // Rounding must not push an in-range sample past a fractional bound.
        let value = if !inject && (rounded < spec.min || rounded > spec.max) {
            raw
        } else {
            rounded
        };

        SimulatedRow {
            timestamp: now,
            signal_id: spec.id.clone(),
            signal: spec.name.clone(),
            data_bytes: encode_data_bytes(value),
            value,
            unit: spec.unit.clone(),
        }
    }

    /// Log location.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Encode a whole value as two big-endian bytes in hex.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn encode_data_bytes(value: f64) -> String {
    if (0.0..=f64::from(u16::MAX)).contains(&value) {
        format!("{:04x}", value as u16)
    } else {
        String::new()
    }
}

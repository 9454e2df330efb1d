//! Configuration loading for the canwatch monitor.
//!
//! Loads `canwatch.toml` (or `$CANWATCH_CONFIG`) with per-section defaults.
//! All sections use `#[serde(default)]` so a minimal or empty config file is
//! valid. Environment variables override file values; the CLI applies its
//! own flags on top before calling [`MonitorConfig::validate`].
//!
//! Precedence: CLI flags > env vars > config file > defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable naming an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "CANWATCH_CONFIG";

/// Config file used when neither `--config` nor `$CANWATCH_CONFIG` is set.
pub const DEFAULT_CONFIG_FILE: &str = "canwatch.toml";

// ── Top-level config ────────────────────────────────────────────

/// Top-level canwatch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Log, ledger, and diagnostics locations.
    pub paths: PathsConfig,
    /// Timing and detection settings for the monitoring engine.
    pub engine: EngineConfig,
    /// Settings for the `simulate` producer.
    pub simulator: SimulatorConfig,
    /// Signal catalog entries, one per monitored bus id.
    pub signals: Vec<SignalConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            engine: EngineConfig::default(),
            simulator: SimulatorConfig::default(),
            signals: default_signals(),
        }
    }
}

/// Filesystem locations used by a run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Append-only signal log written by the producer.
    pub log_file: PathBuf,
    /// Fault ledger written by the engine.
    pub ledger_file: PathBuf,
    /// Directory for the engine's own JSON diagnostics.
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_file: PathBuf::from("logs/can_log.csv"),
            ledger_file: PathBuf::from("logs/fault_log.csv"),
            logs_dir: PathBuf::from("logs/canwatch"),
        }
    }
}

/// Engine timing and detection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max silence applied to signals that do not configure their own.
    pub default_timeout_secs: f64,
    /// Seconds between diagnostic summaries.
    pub summary_interval_secs: u64,
    /// Period of the timeout-evaluation tick.
    pub tick_millis: u64,
    /// Upper bound on how long the reader waits before re-checking the log.
    pub poll_millis: u64,
    /// Range excursion beyond which an out-of-range fault is critical.
    pub severity_margin: f64,
    /// Capacity of the reader-to-engine queue.
    pub queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 3.0,
            summary_interval_secs: 30,
            tick_millis: 1000,
            poll_millis: 250,
            severity_margin: 20.0,
            queue_capacity: 1024,
        }
    }
}

/// Producer simulator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Milliseconds between cycles; each cycle writes one row per signal.
    pub cadence_millis: u64,
    /// Chance (0.0 - 1.0) that a generated value lands outside its range.
    pub out_of_range_probability: f64,
    /// Signal ids the simulator never emits, to provoke timeouts.
    pub silent_signals: Vec<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            cadence_millis: 1000,
            out_of_range_probability: 0.0,
            silent_signals: Vec::new(),
        }
    }
}

/// One `[[signals]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalConfig {
    /// Bus identifier as it appears in the log (e.g. "0x101").
    pub id: String,
    /// Human-readable signal name.
    pub name: String,
    /// Physical unit, informational only.
    #[serde(default)]
    pub unit: String,
    /// Lowest valid value.
    pub min: f64,
    /// Highest valid value.
    pub max: f64,
    /// Expected max silence; falls back to `engine.default_timeout_secs`.
    #[serde(default)]
    pub max_silence_secs: Option<f64>,
    /// Diagnostic trouble code reported alongside faults.
    #[serde(default)]
    pub dtc: Option<String>,
}

impl MonitorConfig {
    /// Load configuration from the resolved config path plus env overrides.
    ///
    /// An explicit path must exist. The implicit paths (`$CANWATCH_CONFIG`,
    /// `./canwatch.toml`) fall back to defaults when missing. The result is
    /// not validated; callers apply CLI overrides first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if an env override is malformed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::load_with(explicit, |key| std::env::var(key).ok())
    }

    /// Same as [`MonitorConfig::load`] with a custom env resolver (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if an env override is malformed.
    pub fn load_with(explicit: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = env(CONFIG_PATH_ENV)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
                match std::fs::read_to_string(&path) {
                    Ok(contents) => Self::from_toml_str(&contents)
                        .with_context(|| format!("failed to parse config at {}", path.display()))?,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::debug!(path = %path.display(), "no config file found, using defaults");
                        Self::default()
                    }
                    Err(e) => {
                        return Err(anyhow::anyhow!(
                            "failed to read config at {}: {e}",
                            path.display()
                        ))
                    }
                }
            }
        };
        config.apply_overrides(env)?;
        Ok(config)
    }

    /// Read and parse a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse config TOML")
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability. A malformed numeric value
    /// is an error, never silently dropped.
    ///
    /// # Errors
    ///
    /// Returns an error naming the variable if a numeric value does not parse.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("CANWATCH_LOG_FILE") {
            self.paths.log_file = PathBuf::from(v);
        }
        if let Some(v) = env("CANWATCH_LEDGER_FILE") {
            self.paths.ledger_file = PathBuf::from(v);
        }
        if let Some(v) = env("CANWATCH_TIMEOUT_SECS") {
            self.engine.default_timeout_secs = parse_override("CANWATCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = env("CANWATCH_SUMMARY_INTERVAL_SECS") {
            self.engine.summary_interval_secs =
                parse_override("CANWATCH_SUMMARY_INTERVAL_SECS", &v)?;
        }
        Ok(())
    }

    /// Validate that configuration values are within sane bounds.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.signals.is_empty(), "at least one signal must be configured");

        let mut seen = HashSet::new();
        for signal in &self.signals {
            anyhow::ensure!(!signal.id.trim().is_empty(), "signal id must not be empty");
            anyhow::ensure!(
                seen.insert(signal.id.as_str()),
                "duplicate signal id {}",
                signal.id
            );
            anyhow::ensure!(
                signal.min.is_finite() && signal.max.is_finite(),
                "signal {} range must be finite",
                signal.id
            );
            anyhow::ensure!(
                signal.min < signal.max,
                "signal {} min must be below max",
                signal.id
            );
            if let Some(secs) = signal.max_silence_secs {
                anyhow::ensure!(
                    secs.is_finite() && secs > 0.0,
                    "signal {} max_silence_secs must be positive",
                    signal.id
                );
            }
        }

        anyhow::ensure!(
            self.engine.default_timeout_secs.is_finite() && self.engine.default_timeout_secs > 0.0,
            "default_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.engine.summary_interval_secs >= 1,
            "summary_interval_secs must be >= 1"
        );
        anyhow::ensure!(self.engine.tick_millis >= 10, "tick_millis must be >= 10");
        anyhow::ensure!(self.engine.poll_millis >= 10, "poll_millis must be >= 10");
        anyhow::ensure!(
            self.engine.severity_margin.is_finite() && self.engine.severity_margin >= 0.0,
            "severity_margin must be a non-negative number"
        );
        anyhow::ensure!(self.engine.queue_capacity >= 1, "queue_capacity must be >= 1");

        anyhow::ensure!(
            (0.0..=1.0).contains(&self.simulator.out_of_range_probability),
            "simulator.out_of_range_probability must be in [0.0, 1.0]"
        );
        anyhow::ensure!(
            self.simulator.cadence_millis >= 10,
            "simulator.cadence_millis must be >= 10"
        );
        for id in &self.simulator.silent_signals {
            anyhow::ensure!(
                seen.contains(id.as_str()),
                "simulator.silent_signals references unknown signal {id}"
            );
        }
        Ok(())
    }

    /// Max silence for signals without their own setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured value is not a valid duration.
    pub fn default_timeout(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.engine.default_timeout_secs)
            .context("default_timeout_secs is not a valid duration")
    }

    /// Interval between diagnostic summaries.
    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.engine.summary_interval_secs)
    }

    /// Period of the timeout-evaluation tick.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.engine.tick_millis)
    }

    /// Upper bound on the reader's wait between log checks.
    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.engine.poll_millis)
    }
}

fn parse_override<T>(var: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid {var} value {value:?}"))
}

// Default value functions.

fn default_signals() -> Vec<SignalConfig> {
    vec![
        SignalConfig {
            id: "0x101".to_owned(),
            name: "Speed".to_owned(),
            unit: "km/h".to_owned(),
            min: 0.0,
            max: 160.0,
            max_silence_secs: None,
            dtc: Some("P0500".to_owned()),
        },
        SignalConfig {
            id: "0x102".to_owned(),
            name: "RPM".to_owned(),
            unit: "rpm".to_owned(),
            min: 800.0,
            max: 6000.0,
            max_silence_secs: None,
            dtc: Some("P0300".to_owned()),
        },
        SignalConfig {
            id: "0x103".to_owned(),
            name: "Temp".to_owned(),
            unit: "\u{b0}C".to_owned(),
            min: 70.0,
            max: 110.0,
            max_silence_secs: None,
            dtc: Some("P0128".to_owned()),
        },
    ]
}

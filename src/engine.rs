//! The monitoring engine.
//!
//! Two timelines feed one owner of all signal state:
//!
//! - a reader task drives the [`LogTailer`] and pushes events onto a bounded
//!   queue, waiting on filesystem notifications (with a poll fallback) when
//!   the log has nothing new;
//! - the consumer loop `select!`s over that queue, a fixed tick interval,
//!   and the shutdown signal. Rows run the range check; ticks run the
//!   timeout check for every signal and emit summaries when due.
//!
//! A ledger failure ends the run. Everything else is logged and skipped.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::{SignalCatalog, SignalSpec};
use crate::config::MonitorConfig;
use crate::detector::{self, Fault};
use crate::ledger::{FaultLedger, FaultRecord, LedgerError};
use crate::reporter::{Summary, SummaryReporter};
use crate::state::{SignalStates, UnknownSignal};
use crate::tailer::{LogTailer, Reading, TailEvent};

/// Errors that end a run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The fault ledger could not be written.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// Signal state and catalog disagree.
    #[error(transparent)]
    State(#[from] UnknownSignal),
}

/// Timing and detection knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    /// Range excursion beyond which a fault is critical.
    pub severity_margin: f64,
    /// Period of the timeout-evaluation tick.
    pub tick: Duration,
    /// Upper bound on the reader's wait between log checks.
    pub poll: Duration,
    /// Interval between summaries.
    pub summary_interval: Duration,
    /// Capacity of the reader-to-engine queue.
    pub queue_capacity: usize,
}

impl EngineSettings {
    /// Extract engine settings from a validated config.
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            severity_margin: config.engine.severity_margin,
            tick: config.tick_period(),
            poll: config.poll_period(),
            summary_interval: config.summary_interval(),
            queue_capacity: config.engine.queue_capacity,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            severity_margin: 20.0,
            tick: Duration::from_secs(1),
            poll: Duration::from_millis(250),
            summary_interval: Duration::from_secs(30),
            queue_capacity: 1024,
        }
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Well-formed rows consumed.
    pub rows: u64,
    /// Malformed rows discarded.
    pub malformed: u64,
    /// Rows for ids outside the catalog.
    pub unknown: u64,
    /// Times the log was found truncated or rotated.
    pub rotations: u64,
    /// Fault records written.
    pub faults: u64,
    /// Summaries rendered.
    pub summaries: u64,
}

/// Result of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Timeout faults written this tick.
    pub faults: Vec<FaultRecord>,
    /// Summary, if the summary interval elapsed.
    pub summary: Option<Summary>,
}

/// Owns the catalog, signal states, ledger, and summary timer.
pub struct Engine {
    catalog: SignalCatalog,
    states: SignalStates,
    ledger: FaultLedger,
    reporter: SummaryReporter,
    settings: EngineSettings,
    stats: RunStats,
    summary_out: Box<dyn Write + Send>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("signals", &self.catalog.len())
            .field("ledger", &self.ledger)
            .field("settings", &self.settings)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Engine {
    /// Assemble an engine around an already-initialised ledger.
    ///
    /// Every catalog signal starts unseen with zero faults. The first summary
    /// is due one interval after `started_at`. Summaries go to stdout unless
    /// redirected with [`Engine::with_summary_writer`].
    pub fn new(
        catalog: SignalCatalog,
        ledger: FaultLedger,
        settings: EngineSettings,
        started_at: DateTime<Utc>,
    ) -> Self {
        let states = SignalStates::new(&catalog);
        Self {
            catalog,
            states,
            ledger,
            reporter: SummaryReporter::new(settings.summary_interval, started_at),
            settings,
            stats: RunStats::default(),
            summary_out: Box::new(std::io::stdout()),
        }
    }

    /// Startup sequence: build the catalog, then truncate and re-header the
    /// ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog is invalid or the ledger cannot be
    /// created.
    pub fn from_config(config: &MonitorConfig, started_at: DateTime<Utc>) -> anyhow::Result<Self> {
        let catalog = SignalCatalog::from_config(config)?;
        let ledger = FaultLedger::create(&config.paths.ledger_file)?;
        Ok(Self::new(
            catalog,
            ledger,
            EngineSettings::from_config(config),
            started_at,
        ))
    }

    /// Send rendered summaries to `out` instead of stdout.
    #[must_use]
    pub fn with_summary_writer(mut self, out: Box<dyn Write + Send>) -> Self {
        self.summary_out = out;
        self
    }

    /// The signal catalog.
    pub fn catalog(&self) -> &SignalCatalog {
        &self.catalog
    }

    /// Current signal states.
    pub fn states(&self) -> &SignalStates {
        &self.states
    }

    /// Counters so far.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Ledger location.
    pub fn ledger_path(&self) -> &Path {
        self.ledger.path()
    }

    /// Dispatch one tailer event.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if a fault cannot be written.
    pub fn handle_event(&mut self, event: TailEvent) -> Result<Option<FaultRecord>, EngineError> {
        match event {
            TailEvent::Row(reading) => self.handle_reading(&reading),
            TailEvent::Malformed { line, reason } => {
                self.stats.malformed = self.stats.malformed.saturating_add(1);
                warn!(%line, %reason, "discarding malformed log row");
                Ok(None)
            }
            TailEvent::Rotated => {
                self.stats.rotations = self.stats.rotations.saturating_add(1);
                info!("log truncated or rotated, reading from start");
                Ok(None)
            }
            TailEvent::Pending => Ok(None),
        }
    }

    /// Row timeline: refresh `last_seen`, then run the range check.
    ///
    /// Readings for ids outside the catalog are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if a fault cannot be written.
    pub fn handle_reading(&mut self, reading: &Reading) -> Result<Option<FaultRecord>, EngineError> {
        let Some(spec) = self.catalog.get(&reading.signal_id) else {
            self.stats.unknown = self.stats.unknown.saturating_add(1);
            debug!(signal_id = %reading.signal_id, "ignoring row for unknown signal");
            return Ok(None);
        };

        self.states
            .record_reading(&reading.signal_id, reading.timestamp)?;
        self.stats.rows = self.stats.rows.saturating_add(1);
        debug!(
            signal = %spec.name,
            value = reading.value,
            timestamp = %reading.timestamp,
            "reading"
        );

        let Some(fault) = detector::check_range(spec, reading.value, self.settings.severity_margin)
        else {
            return Ok(None);
        };
        let record = write_fault(
            &mut self.ledger,
            &mut self.states,
            &mut self.stats,
            spec,
            fault,
            reading.timestamp,
        )?;
        Ok(Some(record))
    }

    /// Tick timeline: timeout check for every signal, then the summary if due.
    ///
    /// A fired timeout moves the signal's `last_seen` to `now`, so the same
    /// silence reports once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if a fault cannot be written.
    pub fn handle_tick(&mut self, now: DateTime<Utc>) -> Result<TickReport, EngineError> {
        let mut faults = Vec::new();
        for spec in self.catalog.iter() {
            let last_seen = self.states.get(&spec.id).and_then(|state| state.last_seen);
            if let Some(fault) = detector::check_timeout(spec, now, last_seen) {
                let record = write_fault(
                    &mut self.ledger,
                    &mut self.states,
                    &mut self.stats,
                    spec,
                    fault,
                    now,
                )?;
                self.states.refresh(&spec.id, now)?;
                faults.push(record);
            }
        }

        let summary = self.reporter.poll(&self.catalog, &self.states, now);
        if let Some(summary) = &summary {
            self.stats.summaries = self.stats.summaries.saturating_add(1);
            info!(
                total_faults = summary.total_faults(),
                signals = summary.lines.len(),
                "diagnostic summary"
            );
            if let Err(e) = writeln!(self.summary_out, "{summary}") {
                warn!(error = %e, "failed to print summary");
            }
        }

        Ok(TickReport { faults, summary })
    }

    /// Follow the log until shutdown or a fatal ledger error.
    ///
    /// Shutdown is observed within one tick period. The reader task is
    /// given one more tick period to stop before it is aborted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] if a fault cannot be written.
    pub async fn run(
        mut self,
        tailer: LogTailer,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<RunStats, EngineError> {
        let (tx, mut rx) = mpsc::channel(self.settings.queue_capacity);
        let mut reader = tokio::spawn(read_log(
            tailer,
            tx,
            self.settings.poll,
            shutdown_rx.clone(),
        ));

        let mut ticker = tokio::time::interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick.
        ticker.tick().await;

        info!(
            signals = self.catalog.len(),
            ledger = %self.ledger.path().display(),
            tick_ms = u64::try_from(self.settings.tick.as_millis()).unwrap_or(u64::MAX),
            "engine started"
        );

        let mut reader_open = true;
        let outcome = loop {
            tokio::select! {
                event = rx.recv(), if reader_open => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event) {
                            break Err(e);
                        }
                    }
                    None => {
                        debug!("log reader finished");
                        reader_open = false;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.handle_tick(Utc::now()) {
                        break Err(e);
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("engine shutting down");
                        break Ok(());
                    }
                }
            }
        };

        drop(rx);
        if tokio::time::timeout(self.settings.tick, &mut reader)
            .await
            .is_err()
        {
            warn!("log reader did not stop in time, aborting");
            reader.abort();
        }

        match outcome {
            Ok(()) => {
                info!(
                    rows = self.stats.rows,
                    faults = self.stats.faults,
                    malformed = self.stats.malformed,
                    "engine stopped"
                );
                Ok(self.stats)
            }
            Err(e) => {
                warn!(error = %e, "engine stopped on fatal error");
                Err(e)
            }
        }
    }
}

/// Append a fault, then count it. The count only moves once the record is
/// on disk.
fn write_fault(
    ledger: &mut FaultLedger,
    states: &mut SignalStates,
    stats: &mut RunStats,
    spec: &SignalSpec,
    fault: Fault,
    at: DateTime<Utc>,
) -> Result<FaultRecord, EngineError> {
    let record = FaultRecord::new(spec, fault, at);
    ledger.append(&record)?;
    let count = states.record_fault(&spec.id)?;
    stats.faults = stats.faults.saturating_add(1);
    warn!(
        signal_id = %record.signal_id,
        signal = %record.signal_name,
        fault_type = %record.fault_type,
        severity = %record.severity,
        fault_count = count,
        details = %record.details,
        "fault detected"
    );
    Ok(record)
}

/// Reader task: pull events from the tailer and queue them for the engine.
///
/// Waits for a filesystem notification, the poll period, queue closure, or
/// shutdown whenever the tailer is pending.
async fn read_log(
    mut tailer: LogTailer,
    tx: mpsc::Sender<TailEvent>,
    poll: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // The sender stays alive here so `recv` never resolves to `None`.
    let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
    let _watcher = watch_log_dir(tailer.path(), wake_tx.clone());

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let event = match tailer.next_row() {
            Ok(TailEvent::Pending) => None,
            Ok(event) => Some(event),
            Err(e) => {
                warn!(error = %e, "log read failed, retrying");
                None
            }
        };

        if let Some(event) = event {
            if tx.send(event).await.is_err() {
                break;
            }
            continue;
        }

        tokio::select! {
            _ = wake_rx.recv() => {}
            _ = tokio::time::sleep(poll) => {}
            _ = tx.closed() => break,
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    drop(wake_tx);
    debug!(offset = tailer.offset(), "log reader stopped");
}

/// Watch the log's directory so appends and creation wake the reader.
///
/// Returns `None` when watching is unavailable; the reader then relies on
/// the poll period alone.
fn watch_log_dir(log_path: &Path, wake_tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let dir = match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = match notify::recommended_watcher(
        move |event: notify::Result<notify::Event>| {
            if event.is_ok() {
                // A full queue already holds a pending wake-up.
                let _ = wake_tx.try_send(());
            }
        },
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            warn!(error = %e, "file watcher unavailable, polling only");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        debug!(dir = %dir.display(), error = %e, "cannot watch log directory, polling only");
        return None;
    }
    Some(watcher)
}

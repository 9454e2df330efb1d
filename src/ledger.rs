//! Durable, append-only fault ledger.
//!
//! The ledger is a CSV file truncated and re-headered at each engine start.
//! Every append is flushed and synced before returning, so a record the
//! engine has counted is on disk. [`read_ledger`] is the read-only view used
//! by the `faults` query.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::SignalSpec;
use crate::detector::{Fault, FaultKind, Severity};

/// Ledger column names, in order.
pub const LEDGER_HEADER: [&str; 6] = [
    "Timestamp",
    "CAN_ID",
    "Signal",
    "Fault_Type",
    "Severity",
    "Details",
];

/// Errors from writing or reading the ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The ledger file does not exist.
    #[error("fault ledger not found at {}", path.display())]
    NotFound {
        /// Ledger path.
        path: PathBuf,
    },
    /// Opening, writing, flushing, or syncing failed.
    #[error("fault ledger I/O failed at {}: {source}", path.display())]
    Io {
        /// Ledger path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// A record could not be encoded or decoded.
    #[error("fault ledger CSV error at {}: {source}", path.display())]
    Csv {
        /// Ledger path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: csv::Error,
    },
}

/// One fault, attributed to a signal and a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct FaultRecord {
    /// When the fault was detected.
    pub timestamp: DateTime<Utc>,
    /// Bus id of the faulty signal.
    pub signal_id: String,
    /// Name of the faulty signal.
    pub signal_name: String,
    /// Fault class.
    pub fault_type: FaultKind,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub details: String,
}

impl FaultRecord {
    /// Attribute a detected fault to a signal at `at`.
    pub fn new(spec: &SignalSpec, fault: Fault, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at,
            signal_id: spec.id.clone(),
            signal_name: spec.name.clone(),
            fault_type: fault.kind,
            severity: fault.severity,
            details: fault.details,
        }
    }

    fn to_row(&self) -> [String; 6] {
        [
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.signal_id.clone(),
            self.signal_name.clone(),
            self.fault_type.as_str().to_owned(),
            self.severity.as_str().to_owned(),
            self.details.clone(),
        ]
    }
}

/// A ledger row as read back, keyed by the ledger header names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// RFC 3339 detection time.
    #[serde(rename = "Timestamp")]
    pub timestamp: String,
    /// Bus id.
    #[serde(rename = "CAN_ID")]
    pub can_id: String,
    /// Signal name.
    #[serde(rename = "Signal")]
    pub signal: String,
    /// `Timeout` or `OutOfRange`.
    #[serde(rename = "Fault_Type")]
    pub fault_type: String,
    /// `Warning` or `Critical`.
    #[serde(rename = "Severity")]
    pub severity: String,
    /// Human-readable description.
    #[serde(rename = "Details")]
    pub details: String,
}

/// Byte destination behind a [`FaultLedger`].
pub trait LedgerSink: Write + Send {
    /// Force written bytes to stable storage.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the data cannot be persisted.
    fn sync(&self) -> io::Result<()>;
}

impl LedgerSink for fs::File {
    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Sole write path for fault records.
pub struct FaultLedger {
    path: PathBuf,
    writer: csv::Writer<Box<dyn LedgerSink>>,
    appended: u64,
}

impl std::fmt::Debug for FaultLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultLedger")
            .field("path", &self.path)
            .field("appended", &self.appended)
            .finish()
    }
}

impl FaultLedger {
    /// Create (or truncate) the ledger and write its header.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the file cannot be created or written.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
        }
        let file = fs::File::create(&path).map_err(|source| LedgerError::Io {
            path: path.clone(),
            source,
        })?;
        Self::with_sink(path, Box::new(file))
    }

    /// Start a ledger on an already-open sink and write its header.
    ///
    /// `path` only labels errors and log output.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the header cannot be written or synced.
    pub fn with_sink(
        path: impl Into<PathBuf>,
        sink: Box<dyn LedgerSink>,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self {
            path: path.into(),
            writer: csv::Writer::from_writer(sink),
            appended: 0,
        };
        ledger
            .writer
            .write_record(LEDGER_HEADER)
            .map_err(|source| ledger.csv_error(source))?;
        ledger.sync()?;
        Ok(ledger)
    }

    /// Append one record and sync it to disk before returning.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the write, flush, or sync fails. The run
    /// must not continue after an error.
    pub fn append(&mut self, record: &FaultRecord) -> Result<(), LedgerError> {
        self.writer
            .write_record(record.to_row())
            .map_err(|source| self.csv_error(source))?;
        self.sync()?;
        self.appended = self.appended.saturating_add(1);
        Ok(())
    }

    /// Ledger location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended since creation.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    fn sync(&mut self) -> Result<(), LedgerError> {
        self.writer.flush().map_err(|source| self.io_error(source))?;
        self.writer
            .get_ref()
            .sync()
            .map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: io::Error) -> LedgerError {
        LedgerError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn csv_error(&self, source: csv::Error) -> LedgerError {
        LedgerError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

/// Read every record from a ledger file.
///
/// # Errors
///
/// Returns [`LedgerError::NotFound`] if the file does not exist, or another
/// [`LedgerError`] if it cannot be read or decoded.
pub fn read_ledger(path: &Path) -> Result<Vec<LedgerEntry>, LedgerError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(LedgerError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    csv::Reader::from_reader(file)
        .deserialize()
        .map(|row| {
            row.map_err(|source| LedgerError::Csv {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}

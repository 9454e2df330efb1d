//! Incremental reader for the append-only signal log.
//!
//! Tracks a committed byte offset into the log and hands out one complete
//! row per call. A trailing line without a newline belongs to a producer
//! that is still writing, so it is left in place and re-read on the next
//! call. Uses synchronous `std::fs` reads since these are quick local
//! operations.

use std::fs;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Column names written by the producer, in order.
pub const LOG_HEADER: [&str; 6] = [
    "Timestamp",
    "CAN_ID",
    "Signal",
    "Data_Bytes",
    "Decoded_Value",
    "Unit",
];

/// Lines longer than this are discarded as malformed.
const MAX_LINE_LEN: usize = 1_048_576;

/// Naive timestamp layouts accepted besides RFC 3339.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// One parsed log row.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// When the producer sampled the value.
    pub timestamp: DateTime<Utc>,
    /// Bus id of the signal.
    pub signal_id: String,
    /// Decoded physical value.
    pub value: f64,
}

/// Outcome of a single [`LogTailer::next_row`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum TailEvent {
    /// A complete, well-formed row.
    Row(Reading),
    /// A complete row that could not be parsed. Already consumed.
    Malformed {
        /// The offending line, without its terminator.
        line: String,
        /// Why the line was rejected.
        reason: String,
    },
    /// The log shrank below the committed offset; reading restarts at 0.
    Rotated,
    /// No complete row is available yet (missing file, no new data, or a
    /// partially written line).
    Pending,
}

/// I/O failures other than the log not existing yet.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    /// The log exists but could not be opened or inspected.
    #[error("failed to open log file {}: {source}", path.display())]
    Open {
        /// Log path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Seeking or reading failed mid-row.
    #[error("failed to read log file {}: {source}", path.display())]
    Read {
        /// Log path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Column positions resolved from the log header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    timestamp: usize,
    id: usize,
    value: usize,
    width: usize,
}

impl Default for ColumnLayout {
    /// The producer's full six-column layout.
    fn default() -> Self {
        Self {
            timestamp: 0,
            id: 1,
            value: 4,
            width: LOG_HEADER.len(),
        }
    }
}

impl ColumnLayout {
    /// Resolve column positions from a header row.
    ///
    /// Accepts the full producer header or any subset that still names a
    /// timestamp, an id, and a value column.
    ///
    /// # Errors
    ///
    /// Returns a reason string if a required column is missing.
    pub fn from_header(line: &str) -> Result<Self, String> {
        let fields = split_fields(line)?;
        let find = |names: &[&str]| {
            fields
                .iter()
                .position(|field| names.iter().any(|name| field.eq_ignore_ascii_case(name)))
        };
        let timestamp = find(&["Timestamp"]).ok_or("header has no Timestamp column")?;
        let id = find(&["CAN_ID", "Signal_ID"]).ok_or("header has no CAN_ID column")?;
        let value = find(&["Decoded_Value", "Value"]).ok_or("header has no value column")?;
        Ok(Self {
            timestamp,
            id,
            value,
            width: fields.len(),
        })
    }

    /// Parse one data row with this layout.
    ///
    /// # Errors
    ///
    /// Returns a reason string for wrong column counts, unparsable
    /// timestamps, empty ids, and non-numeric or non-finite values.
    pub fn parse_row(&self, line: &str) -> Result<Reading, String> {
        let fields = split_fields(line)?;
        if fields.len() != self.width {
            return Err(format!(
                "expected {} columns, found {}",
                self.width,
                fields.len()
            ));
        }
        let field = |position: usize| fields.get(position).map(String::as_str).unwrap_or("");

        let raw_timestamp = field(self.timestamp);
        let timestamp = parse_timestamp(raw_timestamp)
            .ok_or_else(|| format!("unparsable timestamp {raw_timestamp:?}"))?;

        let signal_id = field(self.id);
        if signal_id.is_empty() {
            return Err("empty signal id".to_owned());
        }

        let raw_value = field(self.value);
        let value: f64 = raw_value
            .parse()
            .map_err(|_| format!("non-numeric value {raw_value:?}"))?;
        if !value.is_finite() {
            return Err(format!("non-finite value {raw_value:?}"));
        }

        Ok(Reading {
            timestamp,
            signal_id: signal_id.to_owned(),
            value,
        })
    }
}

/// Identity of the file behind the log path: device and inode on Unix,
/// creation time elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileId(u64, u64);

impl FileId {
    #[cfg(unix)]
    fn of(meta: &fs::Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self(meta.dev(), meta.ino()))
    }

    #[cfg(not(unix))]
    fn of(meta: &fs::Metadata) -> Option<Self> {
        let created = meta
            .created()
            .ok()?
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?;
        Some(Self(created.as_secs(), u64::from(created.subsec_nanos())))
    }
}

/// Follows a single log file by byte offset.
#[derive(Debug)]
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    layout: Option<ColumnLayout>,
    file_id: Option<FileId>,
}

impl LogTailer {
    /// Create a tailer that starts at the beginning of `path`.
    ///
    /// The file does not have to exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            layout: None,
            file_id: None,
        }
    }

    /// Path being followed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed byte offset: everything before it has been returned.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Column layout, once the header has been read.
    pub fn layout(&self) -> Option<ColumnLayout> {
        self.layout
    }

    /// Return the next complete row, or [`TailEvent::Pending`].
    ///
    /// Blank lines and the header are consumed silently. The offset only
    /// moves past newline-terminated lines, so no row is skipped or
    /// returned twice.
    ///
    /// # Errors
    ///
    /// Returns [`TailError`] if the log exists but cannot be read.
    pub fn next_row(&mut self) -> Result<TailEvent, TailError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(TailEvent::Pending),
            Err(source) => return Err(self.open_error(source)),
        };
        let meta = file.metadata().map_err(|source| self.open_error(source))?;
        let file_len = meta.len();
        let file_id = FileId::of(&meta);

        // A different file at the path, or a shorter one, means rotation or
        // truncation: start over.
        let replaced = matches!((self.file_id, file_id), (Some(old), Some(new)) if old != new);
        self.file_id = file_id;
        if replaced || file_len < self.offset {
            self.offset = 0;
            self.layout = None;
            return Ok(TailEvent::Rotated);
        }

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(self.offset))
            .map_err(|source| self.read_error(source))?;

        let mut buf = Vec::new();
        loop {
            if self.offset >= file_len {
                return Ok(TailEvent::Pending);
            }

            buf.clear();
            let limit = u64::try_from(MAX_LINE_LEN).unwrap_or(u64::MAX).saturating_add(1);
            let bytes_read = (&mut reader)
                .take(limit)
                .read_until(b'\n', &mut buf)
                .map_err(|source| self.read_error(source))?;
            if bytes_read == 0 {
                return Ok(TailEvent::Pending);
            }

            if buf.last() != Some(&b'\n') {
                if buf.len() <= MAX_LINE_LEN {
                    // Producer is mid-write; leave the bytes for next time.
                    return Ok(TailEvent::Pending);
                }
                if !skip_past_newline(&mut reader).map_err(|source| self.read_error(source))? {
                    return Ok(TailEvent::Pending);
                }
                self.commit(&mut reader)?;
                return Ok(TailEvent::Malformed {
                    line: String::from_utf8_lossy(&buf[..64.min(buf.len())]).into_owned(),
                    reason: format!("line exceeds {MAX_LINE_LEN} bytes"),
                });
            }

            self.commit(&mut reader)?;

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }

            if let Some(layout) = self.layout {
                return Ok(match layout.parse_row(line) {
                    Ok(reading) => TailEvent::Row(reading),
                    Err(reason) => TailEvent::Malformed {
                        line: line.to_owned(),
                        reason,
                    },
                });
            }

            // First line of the file: a header, or a data row from a
            // producer that skipped the header.
            match ColumnLayout::from_header(line) {
                Ok(layout) => {
                    self.layout = Some(layout);
                    continue;
                }
                Err(reason) => {
                    let layout = ColumnLayout::default();
                    self.layout = Some(layout);
                    return Ok(match layout.parse_row(line) {
                        Ok(reading) => TailEvent::Row(reading),
                        Err(_) => TailEvent::Malformed {
                            line: line.to_owned(),
                            reason,
                        },
                    });
                }
            }
        }
    }

    /// Move the committed offset to the reader's position.
    fn commit(&mut self, reader: &mut BufReader<fs::File>) -> Result<(), TailError> {
        self.offset = reader
            .stream_position()
            .map_err(|source| self.read_error(source))?;
        Ok(())
    }

    fn open_error(&self, source: io::Error) -> TailError {
        TailError::Open {
            path: self.path.clone(),
            source,
        }
    }

    fn read_error(&self, source: io::Error) -> TailError {
        TailError::Read {
            path: self.path.clone(),
            source,
        }
    }
}

/// Discard bytes up to and including the next newline.
///
/// Returns `false` if end of file came first.
fn skip_past_newline(reader: &mut impl BufRead) -> io::Result<bool> {
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(false);
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(position) => {
                reader.consume(position.saturating_add(1));
                return Ok(true);
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Split one CSV line into trimmed fields.
fn split_fields(line: &str) -> Result<Vec<String>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    match reader.records().next() {
        Some(Ok(record)) => Ok(record.iter().map(|field| field.trim().to_owned()).collect()),
        Some(Err(e)) => Err(format!("invalid CSV: {e}")),
        None => Err("empty row".to_owned()),
    }
}

/// Parse an ISO-8601 timestamp.
///
/// Offsets are honoured; naive timestamps are taken as local wall-clock
/// time, which is what the producer writes.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NAIVE_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(raw, format).ok()?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|ts| ts.with_timezone(&Utc))
    })
}

/// Append-only record of completed moves.
///
/// The log is a CSV file with the header `timestamp,action,src,dst`. Every
/// committed move appends one row, flushed and synced before the mover reports
/// success, so the file is always a faithful history for undo.
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{DropsiftError, DropsiftResult};

/// Column names written as the first line of a new log.
pub const LOG_HEADERS: [&str; 4] = ["timestamp", "action", "src", "dst"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// The kind of action a log row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Move,
    /// Rows written by other tools or future versions; undo ignores them.
    #[serde(other)]
    Other,
}

/// One row of the action log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Local time, ISO 8601 at second precision.
    pub timestamp: String,
    pub action: ActionKind,
    /// Where the file was before the move.
    pub src: PathBuf,
    /// Where the file ended up.
    pub dst: PathBuf,
}

impl LogRecord {
    /// Creates a `move` record stamped with the current local time.
    pub fn moved(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> Self {
        Self {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            action: ActionKind::Move,
            src: src.into(),
            dst: dst.into(),
        }
    }
}

/// A log row already encoded as CSV, waiting to be committed.
///
/// Encoding is the step that can reject a record (a path that is not valid
/// UTF-8, for instance), so callers encode before changing anything on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedRow(Vec<u8>);

/// An open action log.
///
/// Appends are serialized by an internal lock, so rows appear in the order
/// moves commit even when several flushes run at once.
pub struct ActionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl std::fmt::Debug for ActionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionLog").field("path", &self.path).finish()
    }
}

impl ActionLog {
    /// Opens a log for appending, creating it with a header when missing.
    pub fn open(path: &Path) -> DropsiftResult<Self> {
        let needs_header = match path.metadata() {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| DropsiftError::io(path, e))?;

        let log = Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        };

        if needs_header {
            let header = encode(|writer| writer.write_record(LOG_HEADERS))
                .map_err(|source| log.write_error(source))?;
            log.commit(&header)?;
        }
        Ok(log)
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encodes `record` without touching the file.
    pub fn prepare(&self, record: &LogRecord) -> DropsiftResult<PreparedRow> {
        encode(|writer| writer.serialize(record)).map_err(|source| self.write_error(source))
    }

    /// Appends a prepared row and makes it durable before returning.
    pub fn commit(&self, row: &PreparedRow) -> DropsiftResult<()> {
        let mut file = self.file.lock();
        file.write_all(&row.0)
            .and_then(|()| file.flush())
            .and_then(|()| file.sync_data())
            .map_err(|e| self.write_error(csv::Error::from(e)))
    }

    /// Appends a record and makes it durable before returning.
    pub fn append(&self, record: &LogRecord) -> DropsiftResult<()> {
        let row = self.prepare(record)?;
        self.commit(&row)
    }

    fn write_error(&self, source: csv::Error) -> DropsiftError {
        DropsiftError::LogWrite {
            path: self.path.clone(),
            source,
        }
    }

    /// Reads every record of a log file, oldest first.
    ///
    /// Rows that cannot be parsed are skipped with a warning; a missing file
    /// is [`DropsiftError::LogUnavailable`].
    pub fn read_all(path: &Path) -> DropsiftResult<Vec<LogRecord>> {
        if !path.is_file() {
            return Err(DropsiftError::LogUnavailable {
                path: path.to_path_buf(),
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|source| DropsiftError::LogRead {
                path: path.to_path_buf(),
                source,
            })?;

        let mut records = Vec::new();
        for (line, row) in reader.deserialize::<LogRecord>().enumerate() {
            match row {
                Ok(record) => records.push(record),
                // +2: one for the header, one for 1-based numbering
                Err(e) => warn!(
                    "Skipping malformed log row {} in {}: {}",
                    line + 2,
                    path.display(),
                    e
                ),
            }
        }
        Ok(records)
    }
}

/// Runs `write` against an in-memory CSV writer and returns the bytes.
fn encode<F>(write: F) -> Result<PreparedRow, csv::Error>
where
    F: FnOnce(&mut csv::Writer<Vec<u8>>) -> Result<(), csv::Error>,
{
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    write(&mut writer)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(PreparedRow(bytes))
}

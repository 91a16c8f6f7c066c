//! Append-only outputs for extracted records
//!
//! Two destinations receive records:
//!
//! - a **flat output** per source file, rewritten on every run, one
//!   `"<dedup value> - <json>"` line per record;
//! - the **ledger**, a CSV file that accumulates across runs and only grows.
//!
//! # Ledger merge policy
//!
//! A record is appended when its dedup timestamp is strictly newer than the
//! timestamp of the ledger's *last physical row*, or when either side has no
//! usable timestamp. The last row is read once when the ledger is opened and
//! then tracked in memory as rows are appended, so the comparison is always
//! against the row written most recently, never against the maximum. Ledgers
//! that were not appended in timestamp order will accept or reject records
//! accordingly.
//!
//! # Format
//!
//! Plain comma separated values with a header row naming the fields. Values
//! are never quoted: commas and line breaks inside a value are replaced by
//! spaces before writing.
//!
//! # Concurrency
//!
//! A ledger must have a single writer. Two processes appending to the same
//! path at once can interleave rows and break the ordering the merge policy
//! relies on; nothing here locks the file.

use chrono::NaiveDateTime;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::cdr::{Cdr, CdrField, FieldSet};
use crate::error::{IoContext, Result, SyncError};
use crate::timestamp::parse_cdr_timestamp;

/// Default dedup attribute
pub const DEFAULT_DEDUP_FIELD: CdrField = CdrField::DateCreated;

const FIELD_DELIMITER: u8 = b',';

/// Write `records` to `path`, replacing any previous content
pub fn write_flat_output(path: &Path, dedup_field: CdrField, records: &[Cdr]) -> Result<()> {
    let file = File::create(path).with_path(path)?;
    let mut out = BufWriter::new(file);

    for record in records {
        let key = record
            .get(dedup_field)
            .map(|value| value.to_string())
            .unwrap_or_default();
        writeln!(out, "{} - {}", key, record.to_json()).with_path(path)?;
    }

    out.flush().with_path(path)?;
    debug!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

/// What the ledger's last row says about the newest record written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerCursor {
    /// Only the header exists
    Empty,
    /// The last row carries this timestamp
    At(NaiveDateTime),
    /// The last row's timestamp is missing or unreadable
    Unknown,
}

impl LedgerCursor {
    /// Whether a record with `candidate` as its timestamp belongs after the cursor
    pub fn admits(self, candidate: Option<NaiveDateTime>) -> bool {
        match (self, candidate) {
            (LedgerCursor::At(last), Some(ts)) => ts > last,
            _ => true,
        }
    }

    fn from_value(value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => LedgerCursor::Unknown,
            Some(raw) => match parse_cdr_timestamp(raw) {
                Ok(ts) => LedgerCursor::At(ts),
                Err(e) => {
                    warn!("Ledger last row has no usable timestamp ({}), appending unconditionally", e);
                    LedgerCursor::Unknown
                },
            },
        }
    }
}

/// Persistent CSV export with timestamp-based deduplication
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    fields: FieldSet,
    dedup_field: CdrField,
    dedup_column: usize,
    cursor: LedgerCursor,
}

impl Ledger {
    /// Open the ledger at `path`, creating it with a header row if needed,
    /// and read its last row once.
    pub fn open(path: impl Into<PathBuf>, fields: FieldSet, dedup_field: CdrField) -> Result<Self> {
        let path = path.into();
        let dedup_column = fields.position(dedup_field).ok_or_else(|| {
            SyncError::config(format!(
                "Dedup field '{}' must be one of the exported fields",
                dedup_field
            ))
        })?;

        let mut ledger = Self {
            path,
            fields,
            dedup_field,
            dedup_column,
            cursor: LedgerCursor::Empty,
        };

        let existing = match std::fs::read(&ledger.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(SyncError::io(&ledger.path, e)),
        };

        if existing.iter().all(u8::is_ascii_whitespace) {
            if !existing.is_empty() {
                warn!("Ledger {} holds no header, rewriting it", ledger.path.display());
            }
            ledger.write_header()?;
        } else {
            if !existing.ends_with(b"\n") {
                warn!("Ledger {} does not end with a newline, terminating last row", ledger.path.display());
                ledger.append_raw(b"\n")?;
            }
            ledger.cursor = ledger.read_cursor(&existing)?;
        }

        debug!("Opened ledger {} at {:?}", ledger.path.display(), ledger.cursor);
        Ok(ledger)
    }

    /// Location of the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Dedup timestamp of the row appended most recently
    pub fn cursor(&self) -> LedgerCursor {
        self.cursor
    }

    /// Append every record newer than the cursor, in order. Returns the
    /// number of rows written.
    pub fn merge(&mut self, records: &[Cdr]) -> Result<usize> {
        let mut appended = 0;
        for record in records {
            if self.merge_record(record)? {
                appended += 1;
            }
        }

        if appended < records.len() {
            info!(
                "Skipped {} records not newer than the ledger's last row",
                records.len() - appended
            );
        }
        Ok(appended)
    }

    /// Append one record if it is newer than the cursor
    pub fn merge_record(&mut self, record: &Cdr) -> Result<bool> {
        let candidate = self.record_timestamp(record);

        if !self.cursor.admits(candidate) {
            debug!("Skipping record at {:?}, ledger is at {:?}", candidate, self.cursor);
            return Ok(false);
        }

        self.append_row(record)?;
        self.cursor = match candidate {
            Some(ts) => LedgerCursor::At(ts),
            None => LedgerCursor::Unknown,
        };
        Ok(true)
    }

    fn record_timestamp(&self, record: &Cdr) -> Option<NaiveDateTime> {
        let raw = record.get(self.dedup_field)?.to_string();
        match parse_cdr_timestamp(&raw) {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!("{}; record will be appended without a staleness check", e);
                None
            },
        }
    }

    fn read_cursor(&self, contents: &[u8]) -> Result<LedgerCursor> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .delimiter(FIELD_DELIMITER)
            .from_reader(contents);

        let header = reader.headers().with_path(&self.path)?.clone();
        if !header.iter().eq(self.fields.header()) {
            warn!(
                "Ledger {} header differs from the configured fields; reading column {} as {}",
                self.path.display(),
                self.dedup_column,
                self.dedup_field
            );
        }

        let mut last = None;
        for row in reader.records() {
            last = Some(row.with_path(&self.path)?);
        }

        // Blank lines never reach the reader, but a blank last row is a row
        // without a timestamp.
        if last_line(contents).iter().all(u8::is_ascii_whitespace) {
            return Ok(LedgerCursor::Unknown);
        }

        Ok(match last {
            None => LedgerCursor::Empty,
            Some(row) => LedgerCursor::from_value(row.get(self.dedup_column)),
        })
    }

    fn write_header(&self) -> Result<()> {
        info!("Creating ledger {}", self.path.display());
        let file = File::create(&self.path).with_path(&self.path)?;
        let mut writer = row_writer(file);
        writer.write_record(self.fields.header()).with_path(&self.path)?;
        writer.flush().with_path(&self.path)
    }

    fn append_row(&self, record: &Cdr) -> Result<()> {
        let row: Vec<String> = self
            .fields
            .iter()
            .map(|field| {
                record
                    .get(field)
                    .map(|value| sanitize(&value.to_string()))
                    .unwrap_or_default()
            })
            .collect();

        // Opened per row so no handle outlives a single append.
        let mut file = self.open_append()?;

        // csv writes a record of one empty field as `""`
        if let [only] = row.as_slice() {
            if only.is_empty() {
                return file.write_all(b"\n").with_path(&self.path);
            }
        }

        let mut writer = row_writer(file);
        writer.write_record(&row).with_path(&self.path)?;
        writer.flush().with_path(&self.path)
    }

    fn append_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut file = self.open_append()?;
        file.write_all(bytes).with_path(&self.path)
    }

    fn open_append(&self) -> Result<File> {
        OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_path(&self.path)
    }
}

/// Merge `records` into the ledger at `path` using the standard fields and
/// `DateCreated` as dedup key
pub fn merge_to_ledger(path: &Path, records: &[Cdr]) -> Result<usize> {
    Ledger::open(path, FieldSet::standard(), DEFAULT_DEDUP_FIELD)?.merge(records)
}

fn row_writer(file: File) -> csv::Writer<File> {
    csv::WriterBuilder::new()
        .delimiter(FIELD_DELIMITER)
        .quote_style(csv::QuoteStyle::Never)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(file)
}

/// Final line of `contents`, ignoring the terminating newline
fn last_line(contents: &[u8]) -> &[u8] {
    let body = contents.strip_suffix(b"\n").unwrap_or(contents);
    body.rsplit(|b| *b == b'\n').next().unwrap_or_default()
}

/// Keep one value in one column on one line
fn sanitize(value: &str) -> String {
    value.replace([',', '\r', '\n'], " ")
}

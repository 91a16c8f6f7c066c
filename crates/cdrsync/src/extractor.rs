//! CDR extraction from provider log files
//!
//! Log lines that carry a record look like
//!
//! ```text
//! 2024-01-01 10:00:01 INFO Submitting CDR [text={"call":{"DateCreated":"Mon  1 Jan 2024 10:00:00 +0000",...}}]
//! ```
//!
//! The JSON between the marker and the closing `]` is decoded, its `call`
//! object is projected onto the configured [`FieldSet`], and the two code
//! fields are translated. Lines without the marker are ignored. A marker line
//! whose payload cannot be decoded fails the whole file, so a truncated
//! download is never mistaken for a file without records.

use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;

use crate::cdr::{Cdr, CdrField, CdrValue, FieldSet};
use crate::codes;
use crate::error::{IoContext, Result, SyncError};

/// Text that introduces an embedded CDR payload
pub const CDR_MARKER: &str = "Submitting CDR [text=";

/// Closing delimiter of the payload
const PAYLOAD_TERMINATOR: char = ']';

/// Key of the record object inside the payload
const CALL_KEY: &str = "call";

/// Turns log file text into projected CDRs
#[derive(Debug, Clone, Default)]
pub struct RecordExtractor {
    fields: FieldSet,
}

impl RecordExtractor {
    /// Extractor projecting every record onto `fields`
    pub fn new(fields: FieldSet) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Extract every record in `content`, in line order
    pub fn extract(&self, content: &str) -> Result<Vec<Cdr>> {
        let mut records = Vec::new();

        for (idx, line) in content.lines().enumerate() {
            let Some(payload) = isolate_payload(line) else {
                continue;
            };
            let line_number = idx + 1;

            let payload = payload.ok_or_else(|| {
                SyncError::parse(line_number, line, "payload is missing its closing ']'")
            })?;

            let value: Value = serde_json::from_str(payload)
                .map_err(|e| SyncError::parse(line_number, line, e.to_string()))?;

            let Value::Object(mut object) = value else {
                return Err(SyncError::parse(line_number, line, "payload is not a JSON object"));
            };

            match object.remove(CALL_KEY) {
                Some(Value::Object(call)) => records.push(self.project(call)),
                Some(other) => debug!(
                    line_number,
                    "Ignoring payload whose '{}' is not an object: {}", CALL_KEY, other
                ),
                None => debug!(line_number, "Ignoring payload without a '{}' record", CALL_KEY),
            }
        }

        Ok(records)
    }

    /// Read `path` and extract its records.
    ///
    /// Bytes that are not valid UTF-8 are replaced rather than rejected; only
    /// the marker lines need to be well formed.
    pub fn extract_file(&self, path: &Path) -> Result<Vec<Cdr>> {
        let bytes = std::fs::read(path).with_path(path)?;
        let records = self.extract(&String::from_utf8_lossy(&bytes))?;
        debug!("Extracted {} records from {}", records.len(), path.display());
        Ok(records)
    }

    /// Keep the configured attributes of a `call` object, translating codes
    pub fn project(&self, mut call: Map<String, Value>) -> Cdr {
        let mut cdr = Cdr::new();

        for field in self.fields.iter() {
            let Some(value) = call.remove(field.name()).and_then(CdrValue::from_json) else {
                continue;
            };
            cdr.insert(field, translate(field, value));
        }

        cdr
    }
}

/// Extract records with the standard field set
pub fn extract_records(content: &str) -> Result<Vec<Cdr>> {
    RecordExtractor::default().extract(content)
}

/// `None` if the line has no marker, `Some(None)` if the payload is unterminated
fn isolate_payload(line: &str) -> Option<Option<&str>> {
    let after_marker = line.split(CDR_MARKER).nth(1)?;
    Some(after_marker.trim().strip_suffix(PAYLOAD_TERMINATOR))
}

fn translate(field: CdrField, value: CdrValue) -> CdrValue {
    let lookup = match field {
        CdrField::StatusCode => codes::status_text,
        CdrField::ResponseCode => codes::response_text,
        _ => return value,
    };

    match value.as_integer().and_then(lookup) {
        Some(text) => CdrValue::from(text),
        None => value,
    }
}

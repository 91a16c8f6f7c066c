//! Error types for cdrsync
//!
//! Each variant maps to one failure class of a sync run. Whether a failure
//! stops the whole run or only the current file is decided by the
//! orchestrator; see [`SyncError::is_run_fatal`].

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias for cdrsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Longest slice of an offending line kept in an error message
const MAX_LINE_IN_ERROR: usize = 160;

/// Errors raised while listing, extracting or recording CDRs
#[derive(Error, Debug)]
pub enum SyncError {
    /// A remote listing line is too short to hold a name and a size
    #[error("Malformed listing line '{line}': {reason}")]
    ListingFormat { line: String, reason: String },

    /// A marker line whose embedded payload could not be decoded
    #[error("Malformed CDR payload on line {line_number} ('{line}'): {reason}")]
    Parse {
        line_number: usize,
        line: String,
        reason: String,
    },

    /// A dedup value that does not match `<weekday> <day> <month> <year> <HH:MM:SS> +0000`
    #[error("Invalid CDR timestamp '{0}'")]
    TimestampFormat(String),

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    /// Listing or fetching through the remote source failed
    #[error("Transport error: {0:#}")]
    Transport(anyhow::Error),

    /// Any of the above, tagged with the source file being processed
    #[error("{file}: {source}")]
    File {
        file: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn listing_format(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ListingFormat {
            line: line.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(line_number: usize, line: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            line_number,
            line: truncate(line.trim_end(), MAX_LINE_IN_ERROR),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Attribute this error to the source file `file`
    pub fn in_file(self, file: impl Into<String>) -> Self {
        Self::File {
            file: file.into(),
            source: Box::new(self),
        }
    }

    /// The underlying error with any file tag removed
    pub fn root(&self) -> &SyncError {
        match self {
            Self::File { source, .. } => source.root(),
            other => other,
        }
    }

    /// Errors that make continuing with the remaining files pointless
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self.root(),
            Self::ListingFormat { .. } | Self::Config(_)
        )
    }
}

fn truncate(line: &str, max: usize) -> String {
    match line.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}

/// Attach a path to a raw `std::io::Error`
pub(crate) trait IoContext<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, std::io::Error> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| SyncError::io(path, e))
    }
}

impl<T> IoContext<T> for std::result::Result<T, csv::Error> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| SyncError::io(path, e.into()))
    }
}

//! Sync configuration
//!
//! Settings come from `CDRSYNC_*` environment variables (a `.env` file is
//! honoured by the binary) and may be overridden by command line flags.
//!
//! | Variable                | Default        |
//! |-------------------------|----------------|
//! | `CDRSYNC_FTP_HOST`      | `localhost`    |
//! | `CDRSYNC_FTP_PORT`      | `21`           |
//! | `CDRSYNC_FTP_USERNAME`  |                |
//! | `CDRSYNC_FTP_PASSWORD`  |                |
//! | `CDRSYNC_FTP_TLS`       | `true`         |
//! | `CDRSYNC_REMOTE_DIR`    | `logs`         |
//! | `CDRSYNC_LIST_PATTERN`  | `*.gz *.txt`   |
//! | `CDRSYNC_WORKING_DIR`   | `workinglogs`  |
//! | `CDRSYNC_OUTPUT_DIR`    | `parsedlogs`   |
//! | `CDRSYNC_LEDGER`        | none (no CSV)  |
//! | `CDRSYNC_DEDUP_FIELD`   | `DateCreated`  |
//! | `CDRSYNC_FIELDS`        | standard set   |

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cdr::{CdrField, FieldSet};
use crate::error::{IoContext, Result, SyncError};
use crate::ledger::DEFAULT_DEDUP_FIELD;
use crate::transport::FtpConfig;

/// Where downloads land when `CDRSYNC_WORKING_DIR` is unset
pub const DEFAULT_WORKING_DIR: &str = "workinglogs";
/// Where flat output goes when `CDRSYNC_OUTPUT_DIR` is unset
pub const DEFAULT_OUTPUT_DIR: &str = "parsedlogs";

const LEDGER_EXTENSION: &str = "csv";

/// Everything one sync or import run needs
///
/// Serializes without the FTP password, so the effective configuration can be
/// logged. Missing keys fall back to [`SyncConfig::default`] when
/// deserializing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub ftp: FtpConfig,

    /// Downloaded (and decompressed) log files
    pub working_dir: PathBuf,

    /// One flat record file per processed log file
    pub output_dir: PathBuf,

    /// Persistent CSV export; `None` disables it
    pub ledger_path: Option<PathBuf>,

    /// Timestamp attribute deciding whether a record is new to the ledger
    pub dedup_field: CdrField,

    /// Exported attributes, in column order
    pub fields: FieldSet,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ftp: FtpConfig::default(),
            working_dir: PathBuf::from(DEFAULT_WORKING_DIR),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            ledger_path: None,
            dedup_field: DEFAULT_DEDUP_FIELD,
            fields: FieldSet::standard(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = var("CDRSYNC_FTP_HOST") {
            config.ftp.host = host;
        }
        if let Some(port) = var("CDRSYNC_FTP_PORT") {
            config.ftp.port = port
                .parse()
                .map_err(|_| SyncError::config(format!("CDRSYNC_FTP_PORT '{}' is not a port", port)))?;
        }
        if let Some(username) = var("CDRSYNC_FTP_USERNAME") {
            config.ftp.username = username;
        }
        if let Some(password) = var("CDRSYNC_FTP_PASSWORD") {
            config.ftp.password = password;
        }
        if let Some(tls) = var("CDRSYNC_FTP_TLS") {
            config.ftp.tls = parse_flag(&tls)
                .ok_or_else(|| SyncError::config(format!("CDRSYNC_FTP_TLS '{}' is not a boolean", tls)))?;
        }
        if let Some(dir) = var("CDRSYNC_REMOTE_DIR") {
            config.ftp.remote_dir = dir;
        }
        if let Some(pattern) = var("CDRSYNC_LIST_PATTERN") {
            config.ftp.list_pattern = pattern;
        }
        if let Some(dir) = var("CDRSYNC_WORKING_DIR") {
            config.working_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("CDRSYNC_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(ledger) = var("CDRSYNC_LEDGER").filter(|l| !l.trim().is_empty()) {
            config.set_ledger_path(ledger);
        }
        if let Some(field) = var("CDRSYNC_DEDUP_FIELD") {
            config.dedup_field = field.trim().parse()?;
        }
        if let Some(fields) = var("CDRSYNC_FIELDS") {
            config.fields = fields.parse()?;
        }

        Ok(config)
    }

    /// Set the ledger path, adding a `.csv` extension when it has none
    pub fn set_ledger_path(&mut self, path: impl Into<PathBuf>) {
        self.ledger_path = Some(normalize_ledger_path(path.into()));
    }

    /// Reject settings no run can succeed with: an empty FTP host, or a
    /// ledger whose dedup field is not among the exported columns
    pub fn validate(&self) -> Result<()> {
        if self.ftp.host.trim().is_empty() {
            return Err(SyncError::config("FTP host must not be empty"));
        }
        if self.ledger_path.is_some() && !self.fields.contains(self.dedup_field) {
            return Err(SyncError::config(format!(
                "Dedup field '{}' must be exported when a ledger is configured",
                self.dedup_field
            )));
        }
        Ok(())
    }

    /// Create the working, output and ledger directories when absent
    pub fn prepare_directories(&self) -> Result<()> {
        create_dir(&self.working_dir)?;
        create_dir(&self.output_dir)?;

        if let Some(parent) = self
            .ledger_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
        {
            create_dir(parent)?;
        }
        Ok(())
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        debug!("Creating directory {}", dir.display());
    }
    std::fs::create_dir_all(dir).with_path(dir)
}

fn normalize_ledger_path(path: PathBuf) -> PathBuf {
    if path.extension().is_some_and(|ext| ext == LEDGER_EXTENSION) {
        return path;
    }
    let mut name = path.into_os_string();
    name.push(".");
    name.push(LEDGER_EXTENSION);
    PathBuf::from(name)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

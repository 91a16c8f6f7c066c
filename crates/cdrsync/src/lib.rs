//! cdrsync library
//!
//! Synchronizes call detail records from a provider's FTP log directory into
//! local files and an append-only CSV ledger.
//!
//! # Pipeline
//!
//! 1. **Detect**: compare the remote listing with the working directory and
//!    keep files that are missing or whose size changed ([`detector`])
//! 2. **Fetch**: download each selected file and unpack `.gz` archives
//!    ([`transport`])
//! 3. **Extract**: pull the JSON payload out of every `Submitting CDR` log
//!    line and keep the configured attributes ([`extractor`])
//! 4. **Merge**: write a flat per-file output and append records newer than
//!    the ledger's last row ([`ledger`])
//!
//! [`orchestrator::SyncOrchestrator`] runs the steps in order and collects a
//! [`orchestrator::SyncReport`].
//!
//! # Example
//!
//! ```no_run
//! use cdrsync::{FtpSource, SyncConfig, SyncOrchestrator};
//!
//! # async fn example() -> cdrsync::Result<()> {
//! let config = SyncConfig::from_env()?;
//! let source = FtpSource::new(config.ftp.clone());
//! let report = SyncOrchestrator::new(config, source).run().await?;
//! println!("{} rows appended", report.rows_appended);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cdr;
pub mod codes;
pub mod config;
pub mod detector;
pub mod error;
pub mod extractor;
pub mod ledger;
pub mod orchestrator;
pub mod timestamp;
pub mod transport;

pub use cdr::{Cdr, CdrField, CdrValue, FieldSet};
pub use config::SyncConfig;
pub use detector::{detect_needed, detect_needed_names, LocalFileState, NeededFile};
pub use error::{Result, SyncError};
pub use extractor::{extract_records, RecordExtractor};
pub use ledger::{merge_to_ledger, write_flat_output, Ledger, LedgerCursor};
pub use orchestrator::{FileFailure, SyncOrchestrator, SyncReport};
pub use timestamp::parse_cdr_timestamp;
pub use transport::{Decompressor, FtpConfig, FtpSource, GzipDecompressor, RemoteSource};

//! Collaborators that move bytes: the remote log source and decompression
//!
//! The sync core only needs three things from the outside world: the raw
//! listing lines of the remote log directory, a way to copy one remote file
//! into the working directory, and a way to unpack `.gz` files next to their
//! archive. These traits are the seams; [`ftp::FtpSource`] and
//! [`decompression::GzipDecompressor`] are the production implementations.

pub mod decompression;
pub mod ftp;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

pub use decompression::GzipDecompressor;
pub use ftp::{FtpConfig, FtpSource};

/// Where log files come from
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Raw listing lines (`ls -l` style) for the log files on offer
    async fn list(&self) -> Result<Vec<String>>;

    /// Copy the remote file `name` to `dest`, returning the bytes written
    async fn fetch(&self, name: &str, dest: &Path) -> Result<u64>;
}

/// Unpacks compressed log files beside the archive
pub trait Decompressor: Send + Sync {
    /// Path the decompressed content will be written to, or `None` if `path`
    /// is not an archive this decompressor handles
    fn output_path(&self, path: &Path) -> Option<PathBuf>;

    /// Decompress `path` and return the path of the result
    fn decompress(&self, path: &Path) -> Result<PathBuf>;
}

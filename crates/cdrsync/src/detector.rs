//! Change detection between the remote log directory and the working directory
//!
//! A remote file is fetched again when it is missing locally or when its size
//! differs from the local copy. Same-size content changes go unnoticed.
//!
//! Listing lines are Unix `ls -l` style as returned by FTP `LIST`:
//!
//! ```text
//! -rw-r--r--   1 ftp ftp  123456 Jan 15 12:00 cdr-2024-01-15.txt.gz
//! ```
//!
//! The file name is the last whitespace-separated token and the size is the
//! fifth from last. Names containing whitespace are therefore not supported.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{IoContext, Result, SyncError};

/// Minimum tokens for the size to sit fifth from last: size, month, day, time, name
const MIN_LISTING_TOKENS: usize = 5;

/// A file as reported by the remote listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileInfo {
    pub name: String,
    pub size: u64,
}

impl RemoteFileInfo {
    /// Parse one raw listing line
    pub fn parse_listing_line(line: &str) -> Result<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < MIN_LISTING_TOKENS {
            return Err(SyncError::listing_format(
                line,
                format!("expected at least {} fields, found {}", MIN_LISTING_TOKENS, tokens.len()),
            ));
        }

        let name = tokens[tokens.len() - 1];
        let size_token = tokens[tokens.len() - MIN_LISTING_TOKENS];
        let size = size_token.parse::<u64>().map_err(|_| {
            SyncError::listing_format(line, format!("size field '{}' is not a byte count", size_token))
        })?;

        Ok(Self {
            name: name.to_string(),
            size,
        })
    }
}

/// Names and byte sizes of the files currently in the working directory
#[derive(Debug, Clone, Default)]
pub struct LocalFileState {
    sizes: HashMap<String, u64>,
}

impl LocalFileState {
    /// Snapshot the regular files directly inside `dir`
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut sizes = HashMap::new();

        for entry in std::fs::read_dir(dir).with_path(dir)? {
            let entry = entry.with_path(dir)?;
            let metadata = entry.metadata().with_path(entry.path())?;
            if !metadata.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => {
                    sizes.insert(name, metadata.len());
                },
                Err(name) => debug!("Skipping non UTF-8 file name {:?}", name),
            }
        }

        debug!("Found {} local files in {}", sizes.len(), dir.display());
        Ok(Self { sizes })
    }

    /// Size on disk of the local file called `name`, if present
    pub fn size_of(&self, name: &str) -> Option<u64> {
        self.sizes.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for LocalFileState {
    fn from_iter<I: IntoIterator<Item = (S, u64)>>(iter: I) -> Self {
        Self {
            sizes: iter.into_iter().map(|(name, size)| (name.into(), size)).collect(),
        }
    }
}

/// Why a file was selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    Missing,
    SizeMismatch { remote: u64, local: u64 },
}

/// A file selected for download and processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeededFile {
    pub name: String,
    pub size: u64,
    pub reason: FetchReason,
}

/// Decide whether one remote file must be (re)fetched
pub fn fetch_reason(remote: &RemoteFileInfo, local: &LocalFileState) -> Option<FetchReason> {
    match local.size_of(&remote.name) {
        None => Some(FetchReason::Missing),
        Some(size) if size != remote.size => Some(FetchReason::SizeMismatch {
            remote: remote.size,
            local: size,
        }),
        Some(_) => None,
    }
}

/// Select the files to fetch, in listing order.
///
/// Any malformed listing line fails the whole detection since the remaining
/// decisions can no longer be trusted.
pub fn detect_needed<I, S>(listing: I, local: &LocalFileState) -> Result<Vec<NeededFile>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut needed = Vec::new();
    let mut seen = HashSet::new();

    for line in listing {
        let line = line.as_ref();
        if line.trim().is_empty() {
            continue;
        }

        let remote = RemoteFileInfo::parse_listing_line(line)?;
        if !seen.insert(remote.name.clone()) {
            debug!("{} listed more than once, ignoring repeat", remote.name);
            continue;
        }

        let Some(reason) = fetch_reason(&remote, local) else {
            debug!("File {} unchanged ({} bytes)", remote.name, remote.size);
            continue;
        };

        match reason {
            FetchReason::Missing => info!("File {} missing, adding to list", remote.name),
            FetchReason::SizeMismatch { remote: r, local: l } => info!(
                "File {} remote size {} does not equal {} size on disk, adding to list",
                remote.name, r, l
            ),
        }

        needed.push(NeededFile {
            name: remote.name,
            size: remote.size,
            reason,
        });
    }

    Ok(needed)
}

/// Names of the files to fetch, in listing order
pub fn detect_needed_names<I, S>(listing: I, local: &LocalFileState) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    Ok(detect_needed(listing, local)?
        .into_iter()
        .map(|needed| needed.name)
        .collect())
}

//! Sync orchestrator
//!
//! Runs one synchronization: list the remote directory, pick the files that
//! are missing or changed locally, then fetch, decompress, extract and merge
//! each of them in listing order.
//!
//! A file that cannot be fetched or parsed is recorded in the [`SyncReport`]
//! and the run moves on. Failures that affect every file (a malformed
//! listing, an unreadable ledger) end the run with an error.

use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::cdr::Cdr;
use crate::config::SyncConfig;
use crate::detector::{detect_needed, LocalFileState};
use crate::error::{Result, SyncError};
use crate::extractor::RecordExtractor;
use crate::ledger::{write_flat_output, Ledger};
use crate::transport::{Decompressor, GzipDecompressor, RemoteSource};

/// A file that could not be processed
#[derive(Debug)]
pub struct FileFailure {
    pub file: String,
    pub error: SyncError,
}

/// Outcome of one run
#[derive(Debug, Default)]
pub struct SyncReport {
    pub files_listed: usize,
    pub files_needed: usize,
    pub files_processed: usize,
    pub records_extracted: usize,
    pub rows_appended: usize,
    pub failures: Vec<FileFailure>,
}

impl SyncReport {
    /// True when every needed file was processed
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_processed(&mut self, records: usize, appended: usize) {
        self.files_processed += 1;
        self.records_extracted += records;
        self.rows_appended += appended;
    }

    fn record_failure(&mut self, file: &str, error: SyncError) {
        error!(file = %file, "✗ {}", error.root());
        self.failures.push(FileFailure {
            file: file.to_string(),
            error,
        });
    }
}

/// Drives a run: list the source, pick changed files, fetch, extract and record
///
/// One orchestrator can run repeatedly; each run reopens the ledger.
pub struct SyncOrchestrator<S, D = GzipDecompressor> {
    config: SyncConfig,
    source: S,
    decompressor: D,
    extractor: RecordExtractor,
}

impl<S: RemoteSource> SyncOrchestrator<S> {
    /// Orchestrator for gzip or plain log files from `source`
    pub fn new(config: SyncConfig, source: S) -> Self {
        Self::with_decompressor(config, source, GzipDecompressor)
    }
}

impl<S: RemoteSource, D: Decompressor> SyncOrchestrator<S, D> {
    /// Orchestrator with a custom [`Decompressor`]
    pub fn with_decompressor(config: SyncConfig, source: S, decompressor: D) -> Self {
        let extractor = RecordExtractor::new(config.fields.clone());
        Self {
            config,
            source,
            decompressor,
            extractor,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one full synchronization against the remote source
    pub async fn run(&self) -> Result<SyncReport> {
        info!("Starting sync of {}", self.config.ftp.remote_dir);
        self.config.validate()?;
        self.config.prepare_directories()?;

        let mut ledger = self.open_ledger()?;
        let mut report = SyncReport::default();

        let listing = self.source.list().await.map_err(SyncError::Transport)?;
        report.files_listed = listing.iter().filter(|l| !l.trim().is_empty()).count();

        let local = LocalFileState::scan(&self.config.working_dir)?;
        let needed = detect_needed(&listing, &local)?;
        report.files_needed = needed.len();

        if needed.is_empty() {
            info!("No new or changed files to fetch");
            return Ok(report);
        }
        info!("Files to fetch: {}", needed.len());

        for file in &needed {
            let dest = self.config.working_dir.join(&file.name);
            info!(file = %file.name, size = file.size, reason = ?file.reason, "Fetching");
            if let Err(e) = self.source.fetch(&file.name, &dest).await {
                report.record_failure(&file.name, SyncError::Transport(e).in_file(&file.name));
                continue;
            }
            self.process_file(&file.name, &dest, ledger.as_mut(), &mut report)?;
        }

        self.log_summary(&report);
        Ok(report)
    }

    /// Extract and merge files that are already on disk.
    ///
    /// Bare names are looked up in the working directory; anything with a
    /// directory component is used as given.
    pub fn process_local<I, N>(&self, names: I) -> Result<SyncReport>
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        self.config.prepare_directories()?;

        let mut ledger = self.open_ledger()?;
        let mut report = SyncReport::default();

        for name in names {
            let name = name.as_ref();
            report.files_needed += 1;
            let path = self.resolve_local(name);
            self.process_file(name, &path, ledger.as_mut(), &mut report)?;
        }

        self.log_summary(&report);
        Ok(report)
    }

    fn open_ledger(&self) -> Result<Option<Ledger>> {
        let Some(path) = &self.config.ledger_path else {
            return Ok(None);
        };
        let ledger = Ledger::open(path, self.config.fields.clone(), self.config.dedup_field)?;
        info!("Using ledger {} ({:?})", ledger.path().display(), ledger.cursor());
        Ok(Some(ledger))
    }

    fn resolve_local(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        let is_bare = path
            .parent()
            .is_none_or(|parent| parent.as_os_str().is_empty());
        if is_bare {
            self.config.working_dir.join(path)
        } else {
            path.to_path_buf()
        }
    }

    /// Per-file errors go into the report; ledger errors end the run
    fn process_file(
        &self,
        name: &str,
        path: &Path,
        ledger: Option<&mut Ledger>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let records = match self.extract_to_flat_output(path) {
            Ok(records) => records,
            Err(e) if e.is_run_fatal() => return Err(e.in_file(name)),
            Err(e) => {
                report.record_failure(name, e.in_file(name));
                return Ok(());
            },
        };

        let appended = match ledger {
            Some(ledger) => ledger.merge(&records).map_err(|e| e.in_file(name))?,
            None => 0,
        };

        info!(file = %name, records = records.len(), appended, "✓ Processed");
        report.record_processed(records.len(), appended);
        Ok(())
    }

    fn extract_to_flat_output(&self, path: &Path) -> Result<Vec<Cdr>> {
        let text_path = match self.decompressor.output_path(path) {
            Some(_) => self.decompressor.decompress(path).map_err(SyncError::Transport)?,
            None => path.to_path_buf(),
        };

        let records = self.extractor.extract_file(&text_path)?;

        let file_name = text_path
            .file_name()
            .ok_or_else(|| SyncError::config(format!("{} has no file name", text_path.display())))?;
        let flat_path = self.config.output_dir.join(file_name);
        info!("Parsing {} and saving to {}", text_path.display(), flat_path.display());
        write_flat_output(&flat_path, self.config.dedup_field, &records)?;

        Ok(records)
    }

    fn log_summary(&self, report: &SyncReport) {
        info!(
            "Sync completed: {} processed, {} failed, {} records, {} appended",
            report.files_processed,
            report.failures.len(),
            report.records_extracted,
            report.rows_appended
        );
        if !report.is_success() {
            warn!(
                "Failed files: {}",
                report
                    .failures
                    .iter()
                    .map(|f| f.file.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::extractor::CDR_MARKER;
    use async_trait::async_trait;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::collections::HashSet;
    use std::io::Write;
    use std::sync::Mutex;

    /// In-memory remote directory
    #[derive(Default)]
    struct FakeSource {
        files: Vec<(String, Vec<u8>)>,
        extra_lines: Vec<String>,
        broken: HashSet<String>,
        fetched: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn with_file(mut self, name: &str, bytes: Vec<u8>) -> Self {
            self.files.push((name.to_string(), bytes));
            self
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteSource for FakeSource {
        async fn list(&self) -> anyhow::Result<Vec<String>> {
            let mut lines: Vec<String> = self
                .files
                .iter()
                .map(|(name, bytes)| {
                    format!("-rw-r--r--   1 ftp ftp {:>8} Jan 15 12:00 {}", bytes.len(), name)
                })
                .collect();
            lines.extend(self.extra_lines.iter().cloned());
            Ok(lines)
        }

        async fn fetch(&self, name: &str, dest: &Path) -> anyhow::Result<u64> {
            self.fetched.lock().unwrap().push(name.to_string());
            if self.broken.contains(name) {
                anyhow::bail!("connection reset while fetching {}", name);
            }
            let (_, bytes) = self
                .files
                .iter()
                .find(|(n, _)| n == name)
                .ok_or_else(|| anyhow::anyhow!("550 {}: no such file", name))?;
            std::fs::write(dest, bytes)?;
            Ok(bytes.len() as u64)
        }
    }

    fn marker_line(caller: &str, created: &str) -> String {
        format!(
            "2024-01-01 10:00:01 INFO {}{{\"call\":{{\"Caller\":\"{}\",\"DateCreated\":\"{}\",\"StatusCode\":0}}}}]\n",
            CDR_MARKER, caller, created
        )
    }

    fn gzip(content: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn config(root: &Path) -> SyncConfig {
        let mut config = SyncConfig {
            working_dir: root.join("work"),
            output_dir: root.join("parsed"),
            ..SyncConfig::default()
        };
        config.set_ledger_path(root.join("ledger"));
        config
    }

    fn ledger_rows(root: &Path) -> Vec<String> {
        std::fs::read_to_string(root.join("ledger.csv"))
            .unwrap()
            .lines()
            .skip(1)
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_run_fetches_decompresses_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        let content = [
            marker_line("+1001", "Mon  1 Jan 2024 10:00:00 +0000"),
            "2024-01-01 10:00:02 INFO unrelated\n".to_string(),
            marker_line("+1002", "Mon  1 Jan 2024 09:00:00 +0000"),
        ]
        .concat();
        let source = FakeSource::default().with_file("cdr-1.txt.gz", gzip(&content));

        let orchestrator = SyncOrchestrator::new(config(dir.path()), source);
        let report = orchestrator.run().await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.files_listed, 1);
        assert_eq!(report.files_needed, 1);
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.records_extracted, 2);
        assert_eq!(report.rows_appended, 1);

        assert!(dir.path().join("work/cdr-1.txt").is_file());
        let flat = std::fs::read_to_string(dir.path().join("parsed/cdr-1.txt")).unwrap();
        let lines: Vec<&str> = flat.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Mon  1 Jan 2024 10:00:00 +0000 - "));
        assert!(lines[0].contains(r#""StatusCode":"Delivered""#));
        assert!(lines[1].starts_with("Mon  1 Jan 2024 09:00:00 +0000 - "));

        let rows = ledger_rows(dir.path());
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains("+1001"));
    }

    #[tokio::test]
    async fn test_second_run_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let content = marker_line("+1001", "Mon  1 Jan 2024 10:00:00 +0000");
        let source = FakeSource::default().with_file("cdr-1.txt", content.into_bytes());
        let orchestrator = SyncOrchestrator::new(config(dir.path()), source);

        orchestrator.run().await.unwrap();
        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.files_listed, 1);
        assert_eq!(report.files_needed, 0);
        assert_eq!(orchestrator.source.fetched(), vec!["cdr-1.txt"]);
        assert_eq!(ledger_rows(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_cursor_carries_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default()
            .with_file("a.txt", marker_line("+1", "Mon  1 Jan 2024 10:00:00 +0000").into_bytes())
            .with_file("b.txt", marker_line("+2", "Mon  1 Jan 2024 09:30:00 +0000").into_bytes())
            .with_file("c.txt", marker_line("+3", "Mon  1 Jan 2024 11:00:00 +0000").into_bytes());

        let report = SyncOrchestrator::new(config(dir.path()), source)
            .run()
            .await
            .unwrap();

        assert_eq!(report.files_processed, 3);
        assert_eq!(report.rows_appended, 2);
        let rows = ledger_rows(dir.path());
        assert!(rows[0].contains("+1"));
        assert!(rows[1].contains("+3"));
    }

    #[tokio::test]
    async fn test_fetch_failure_does_not_stop_remaining_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::default()
            .with_file("a.txt", marker_line("+1", "Mon  1 Jan 2024 10:00:00 +0000").into_bytes())
            .with_file("b.txt", marker_line("+2", "Mon  1 Jan 2024 11:00:00 +0000").into_bytes());
        source.broken.insert("a.txt".to_string());

        let orchestrator = SyncOrchestrator::new(config(dir.path()), source);
        let report = orchestrator.run().await.unwrap();

        assert_eq!(orchestrator.source.fetched(), vec!["a.txt", "b.txt"]);
        assert_eq!(report.files_processed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].file, "a.txt");
        assert!(matches!(report.failures[0].error.root(), SyncError::Transport(_)));
        assert!(!dir.path().join("work/a.txt").exists());
        assert_eq!(ledger_rows(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_file_is_reported_and_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let broken = format!("{}{{\"call\":{{\"Caller\":]\n", CDR_MARKER);
        let source = FakeSource::default()
            .with_file("bad.txt", broken.into_bytes())
            .with_file("good.txt", marker_line("+2", "Mon  1 Jan 2024 11:00:00 +0000").into_bytes());

        let report = SyncOrchestrator::new(config(dir.path()), source)
            .run()
            .await
            .unwrap();

        assert_eq!(report.files_processed, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error.root(),
            SyncError::Parse { line_number: 1, .. }
        ));
        assert!(!dir.path().join("parsed/bad.txt").exists());
        assert!(dir.path().join("parsed/good.txt").exists());
    }

    #[tokio::test]
    async fn test_malformed_listing_aborts_before_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::default()
            .with_file("a.txt", marker_line("+1", "Mon  1 Jan 2024 10:00:00 +0000").into_bytes());
        source.extra_lines.push("total 8".to_string());

        let orchestrator = SyncOrchestrator::new(config(dir.path()), source);
        let err = orchestrator.run().await.unwrap_err();

        assert!(matches!(err, SyncError::ListingFormat { .. }));
        assert!(orchestrator.source.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_ledger_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        std::fs::create_dir_all(dir.path().join("ledger.csv")).unwrap();
        config.set_ledger_path(dir.path().join("ledger.csv"));

        let source = FakeSource::default()
            .with_file("a.txt", marker_line("+1", "Mon  1 Jan 2024 10:00:00 +0000").into_bytes());
        let orchestrator = SyncOrchestrator::new(config, source);

        assert!(matches!(orchestrator.run().await, Err(SyncError::Io { .. })));
        assert!(orchestrator.source.fetched().is_empty());
    }

    #[tokio::test]
    async fn test_run_without_ledger_writes_flat_output_only() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig {
            working_dir: dir.path().join("work"),
            output_dir: dir.path().join("parsed"),
            ..SyncConfig::default()
        };
        let source = FakeSource::default()
            .with_file("a.txt", marker_line("+1", "Mon  1 Jan 2024 10:00:00 +0000").into_bytes());

        let report = SyncOrchestrator::new(config, source).run().await.unwrap();
        assert_eq!(report.records_extracted, 1);
        assert_eq!(report.rows_appended, 0);
        assert!(dir.path().join("parsed/a.txt").exists());
    }

    #[test]
    fn test_process_local_resolves_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        std::fs::create_dir_all(&config.working_dir).unwrap();
        std::fs::write(
            config.working_dir.join("local.txt.gz"),
            gzip(&marker_line("+1", "Mon  1 Jan 2024 10:00:00 +0000")),
        )
        .unwrap();
        let elsewhere = dir.path().join("elsewhere.txt");
        std::fs::write(&elsewhere, marker_line("+2", "Mon  1 Jan 2024 11:00:00 +0000")).unwrap();

        let orchestrator = SyncOrchestrator::new(config, FakeSource::default());
        let report = orchestrator
            .process_local(["local.txt.gz", elsewhere.to_str().unwrap(), "absent.txt"])
            .unwrap();

        assert_eq!(report.files_needed, 3);
        assert_eq!(report.files_processed, 2);
        assert_eq!(report.rows_appended, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0].error.root(), SyncError::Io { .. }));
        assert!(dir.path().join("parsed/local.txt").exists());
        assert!(dir.path().join("parsed/elsewhere.txt").exists());
        assert!(orchestrator.source.fetched().is_empty());
    }
}

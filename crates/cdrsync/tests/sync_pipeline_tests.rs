//! End-to-end tests for the extract → flat output → ledger pipeline

use async_trait::async_trait;
use cdrsync::{
    extract_records, merge_to_ledger, write_flat_output, CdrField, LedgerCursor, RemoteSource,
    SyncConfig, SyncError, SyncOrchestrator,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};

const LEDGER_HEADER: &str = "AccountID,ApplicationId,Called,Caller,Channel,DateCreated,DateUpdated,\
DeliveryStatus,Duration,EndTime,MessageBody,Network,ResponseCode,SessionID,StartTime,Status,StatusCode";

const FIRST_ROW: &str = "88412,1042,+15550002,+15550001,TEXT,Mon  1 Jan 2024 10:00:00 +0000,\
Mon  1 Jan 2024 10:00:01 +0000,,0,,see you at 10  bring the keys,SMS,OK,7f1c2a,,Success,Delivered";

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("provider_log.txt")
}

fn fixture() -> String {
    std::fs::read_to_string(fixture_path()).expect("Failed to read fixture")
}

fn test_config(root: &Path) -> SyncConfig {
    let mut config = SyncConfig {
        working_dir: root.join("workinglogs"),
        output_dir: root.join("parsedlogs"),
        ..SyncConfig::default()
    };
    config.set_ledger_path(root.join("export"));
    config
}

/// Serves a single gzipped copy of the fixture
struct FixtureSource {
    name: String,
    bytes: Vec<u8>,
}

impl FixtureSource {
    fn gzipped(name: &str) -> Self {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(fixture().as_bytes()).unwrap();
        Self {
            name: name.to_string(),
            bytes: encoder.finish().unwrap(),
        }
    }
}

#[async_trait]
impl RemoteSource for FixtureSource {
    async fn list(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec![
            String::new(),
            format!("-rw-r--r--    1 1001     1001     {} Jan 01 10:05 {}", self.bytes.len(), self.name),
        ])
    }

    async fn fetch(&self, name: &str, dest: &Path) -> anyhow::Result<u64> {
        anyhow::ensure!(name == self.name, "550 {}: no such file", name);
        std::fs::write(dest, &self.bytes)?;
        Ok(self.bytes.len() as u64)
    }
}

// ============================================================================
// PIPELINE BUILDING BLOCKS
// ============================================================================

#[test]
fn test_out_of_order_record_reaches_flat_output_but_not_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let records = extract_records(&fixture()).expect("Failed to extract records");
    assert_eq!(records.len(), 2);

    let flat = dir.path().join("provider_log.txt");
    write_flat_output(&flat, CdrField::DateCreated, &records).unwrap();
    let flat = std::fs::read_to_string(flat).unwrap();
    let lines: Vec<&str> = flat.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("Mon  1 Jan 2024 10:00:00 +0000 - {\"AccountID\":\"88412\""));
    assert!(lines[0].contains(r#""MessageBody":"see you at 10, bring the keys""#));
    assert!(lines[1].starts_with("Mon  1 Jan 2024 09:00:00 +0000 - "));
    assert!(lines[1].contains(r#""ResponseCode":"Request Terminated""#));
    assert!(lines[1].contains(r#""StatusCode":"Gateway Error""#));

    let ledger = dir.path().join("export.csv");
    let appended = merge_to_ledger(&ledger, &records).unwrap();
    assert_eq!(appended, 1);
    assert_eq!(
        std::fs::read_to_string(&ledger).unwrap(),
        format!("{}\n{}\n", LEDGER_HEADER, FIRST_ROW)
    );
}

#[test]
fn test_rerun_appends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = dir.path().join("export.csv");
    let records = extract_records(&fixture()).unwrap();

    assert_eq!(merge_to_ledger(&ledger, &records).unwrap(), 1);
    let before = std::fs::read_to_string(&ledger).unwrap();

    assert_eq!(merge_to_ledger(&ledger, &records).unwrap(), 0);
    assert_eq!(std::fs::read_to_string(&ledger).unwrap(), before);
}

#[test]
fn test_ledger_reopens_at_last_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("export.csv");
    merge_to_ledger(&path, &extract_records(&fixture()).unwrap()).unwrap();

    let ledger = cdrsync::Ledger::open(
        &path,
        cdrsync::FieldSet::standard(),
        CdrField::DateCreated,
    )
    .unwrap();
    let expected = cdrsync::parse_cdr_timestamp("Mon  1 Jan 2024 10:00:00 +0000").unwrap();
    assert_eq!(ledger.cursor(), LedgerCursor::At(expected));
}

// ============================================================================
// ORCHESTRATED RUNS
// ============================================================================

#[tokio::test]
async fn test_sync_run_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator =
        SyncOrchestrator::new(test_config(dir.path()), FixtureSource::gzipped("cdr-20240101.txt.gz"));

    let report = orchestrator.run().await.expect("Sync run failed");
    assert!(report.is_success());
    assert_eq!(report.files_listed, 1);
    assert_eq!(report.files_needed, 1);
    assert_eq!(report.records_extracted, 2);
    assert_eq!(report.rows_appended, 1);

    let flat = std::fs::read_to_string(dir.path().join("parsedlogs/cdr-20240101.txt")).unwrap();
    assert_eq!(flat.lines().count(), 2);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("export.csv")).unwrap(),
        format!("{}\n{}\n", LEDGER_HEADER, FIRST_ROW)
    );

    // Same listing again: nothing to fetch, ledger untouched
    let report = orchestrator.run().await.unwrap();
    assert_eq!(report.files_needed, 0);
    assert_eq!(report.rows_appended, 0);
}

#[test]
fn test_import_local_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let orchestrator = SyncOrchestrator::new(config, FixtureSource::gzipped("unused.txt.gz"));

    let fixture = fixture_path();
    let report = orchestrator
        .process_local([fixture.to_str().unwrap(), "missing.txt"])
        .unwrap();

    assert_eq!(report.files_processed, 1);
    assert_eq!(report.rows_appended, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].file, "missing.txt");
    assert!(matches!(report.failures[0].error.root(), SyncError::Io { .. }));
    assert!(dir.path().join("parsedlogs/provider_log.txt").is_file());
}

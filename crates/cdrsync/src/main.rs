//! cdrsync - CDR log synchronization tool

use anyhow::{Context, Result};
use cdrsync::{FtpSource, SyncConfig, SyncOrchestrator, SyncReport};
use cdrsync_common::logging::{init_logging, LogConfig, LogLevel};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "cdrsync")]
#[command(author, version, about = "Sync provider CDR logs into a CSV ledger")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch new or changed log files over FTP and process them
    Sync {
        #[command(flatten)]
        output: OutputArgs,

        /// FTP host
        #[arg(long)]
        host: Option<String>,

        /// FTP port
        #[arg(long)]
        port: Option<u16>,

        /// FTP username
        #[arg(short, long)]
        username: Option<String>,

        /// FTP password
        #[arg(short, long)]
        password: Option<String>,

        /// Remote log directory
        #[arg(long)]
        remote_dir: Option<String>,

        /// Use plain FTP instead of FTPS (credentials travel unencrypted)
        #[arg(long)]
        no_tls: bool,
    },

    /// Process log files that are already on disk
    Import {
        #[command(flatten)]
        output: OutputArgs,

        /// Log files (plain or .gz); bare names are read from the working directory
        #[arg(required = true)]
        files: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// CSV ledger to append new records to (.csv is added if missing)
    #[arg(short, long)]
    ledger: Option<PathBuf>,

    /// Directory for downloaded log files
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Directory for per-file flat output
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl OutputArgs {
    fn apply(self, config: &mut SyncConfig) {
        if let Some(ledger) = self.ledger {
            config.set_ledger_path(ledger);
        }
        if let Some(dir) = self.working_dir {
            config.working_dir = dir;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cdrsync")
        .build()
        .with_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = SyncConfig::from_env().context("Failed to load configuration")?;
    debug!(
        "Base configuration: {}",
        serde_json::to_string(&config).unwrap_or_default()
    );

    let report = match cli.command {
        Command::Sync {
            output,
            host,
            port,
            username,
            password,
            remote_dir,
            no_tls,
        } => {
            output.apply(&mut config);
            if let Some(host) = host {
                config.ftp.host = host;
            }
            if let Some(port) = port {
                config.ftp.port = port;
            }
            if let Some(username) = username {
                config.ftp.username = username;
            }
            if let Some(password) = password {
                config.ftp.password = password;
            }
            if let Some(dir) = remote_dir {
                config.ftp.remote_dir = dir;
            }
            if no_tls {
                config.ftp.tls = false;
            }

            if config.ftp.username.is_empty() || config.ftp.password.is_empty() {
                anyhow::bail!(
                    "FTP credentials missing: pass --username/--password or set CDRSYNC_FTP_USERNAME/CDRSYNC_FTP_PASSWORD"
                );
            }

            let source = FtpSource::new(config.ftp.clone());
            SyncOrchestrator::new(config, source)
                .run()
                .await
                .context("Sync failed")?
        },
        Command::Import { output, files } => {
            output.apply(&mut config);
            config.validate()?;

            let source = FtpSource::new(config.ftp.clone());
            SyncOrchestrator::new(config, source)
                .process_local(&files)
                .context("Import failed")?
        },
    };

    print_summary(&report);

    if report.is_success() {
        info!("Sync complete");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_summary(report: &SyncReport) {
    println!("Files listed:      {}", report.files_listed);
    println!("Files processed:   {}/{}", report.files_processed, report.files_needed);
    println!("Records extracted: {}", report.records_extracted);
    println!("Rows appended:     {}", report.rows_appended);

    if !report.is_success() {
        println!("Failed files:");
        for failure in &report.failures {
            println!("  {}: {}", failure.file, failure.error.root());
        }
    }
}

//! FTP log source
//!
//! Lists and downloads provider log files with suppaftp. Every operation opens
//! its own session on a blocking thread and is retried with a linear backoff.
//!
//! Sessions are upgraded with explicit FTPS (`AUTH TLS`) before the
//! credentials are sent, verifying the server against the webpki root store.
//! Plain FTP is only used when [`FtpConfig::tls`] is turned off.
//!
//! ```rust,ignore
//! use cdrsync::transport::{FtpConfig, FtpSource, RemoteSource};
//!
//! let source = FtpSource::new(FtpConfig {
//!     host: "ftp.example.com".to_string(),
//!     username: "account".to_string(),
//!     password: "secret".to_string(),
//!     ..FtpConfig::default()
//! });
//! let lines = source.list().await?;
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use suppaftp::rustls::{ClientConfig, RootCertStore};
use suppaftp::{RustlsConnector, RustlsFtpStream};
use tracing::{debug, info, warn};

use super::RemoteSource;

/// Maximum number of attempts for one FTP operation
pub const MAX_RETRIES: u32 = 3;

/// Base delay between attempts; attempt `n` waits `n` times this
pub const RETRY_DELAY_SECS: u64 = 5;

/// Suffix of a download in progress
const PARTIAL_SUFFIX: &str = ".part";

/// FTP connection settings
///
/// Missing keys fall back to [`FtpConfig::default`] when deserializing. The
/// password is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,

    /// Upgrade the control and data channels with `AUTH TLS` before login
    pub tls: bool,

    /// Directory holding the log files
    pub remote_dir: String,

    /// Argument passed to `LIST`, e.g. `"*.gz *.txt"`
    pub list_pattern: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 21,
            username: String::new(),
            password: String::new(),
            tls: true,
            remote_dir: "logs".to_string(),
            list_pattern: "*.gz *.txt".to_string(),
        }
    }
}

/// suppaftp-backed [`RemoteSource`]
pub struct FtpSource {
    config: FtpConfig,
}

impl FtpSource {
    /// Source that opens a fresh session with `config` for every operation
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }

    /// Run `op` on a blocking thread, retrying failed attempts
    async fn with_retry<T, F>(&self, action: String, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&FtpConfig) -> Result<T> + Clone + Send + 'static,
    {
        for attempt in 1..=MAX_RETRIES {
            debug!("{} attempt {}/{}", action, attempt, MAX_RETRIES);

            let config = self.config.clone();
            let op = op.clone();
            match tokio::task::spawn_blocking(move || op(&config)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if attempt < MAX_RETRIES => {
                    let delay = RETRY_DELAY_SECS * attempt as u64;
                    warn!(
                        "{} attempt {}/{} failed: {:#}. Retrying in {}s...",
                        action, attempt, MAX_RETRIES, e, delay
                    );
                    tokio::time::sleep(Duration::from_secs(delay)).await;
                },
                Ok(Err(e)) => {
                    return Err(e)
                        .with_context(|| format!("{} failed after {} attempts", action, MAX_RETRIES));
                },
                Err(e) => anyhow::bail!("FTP task for {} panicked: {}", action, e),
            }
        }

        anyhow::bail!("{} was never attempted", action)
    }

    fn connect(config: &FtpConfig) -> Result<RustlsFtpStream> {
        debug!("Connecting to FTP server: {}:{}", config.host, config.port);

        let mut stream = RustlsFtpStream::connect(format!("{}:{}", config.host, config.port))
            .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;

        if config.tls {
            debug!("Securing session with {}", config.host);
            stream = stream
                .into_secure(tls_connector()?, &config.host)
                .with_context(|| format!("Failed to secure FTP session with {}", config.host))?;
        } else {
            warn!("TLS disabled; credentials for {} are sent in clear text", config.host);
        }

        // Extended passive mode copes better with NAT
        stream.set_mode(suppaftp::Mode::ExtendedPassive);

        debug!("Logging in as: {}", config.username);
        stream
            .login(&config.username, &config.password)
            .context("FTP login failed")?;

        stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .context("Failed to set binary mode")?;

        stream
            .cwd(&config.remote_dir)
            .with_context(|| format!("Failed to change into remote directory {}", config.remote_dir))?;

        Ok(stream)
    }

    fn disconnect(mut stream: RustlsFtpStream) {
        if let Err(e) = stream.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }
    }

    fn list_sync(config: &FtpConfig) -> Result<Vec<String>> {
        let mut stream = Self::connect(config)?;

        let lines = stream
            .list(Some(config.list_pattern.as_str()))
            .with_context(|| format!("Failed to list '{}' in {}", config.list_pattern, config.remote_dir))?;

        Self::disconnect(stream);
        Ok(lines)
    }

    fn fetch_sync(config: &FtpConfig, name: &str, dest: &Path) -> Result<u64> {
        let mut stream = Self::connect(config)?;

        debug!("Downloading file: {}", name);
        let buffer = stream
            .retr_as_buffer(name)
            .with_context(|| format!("Failed to download {}", name))?
            .into_inner();

        Self::disconnect(stream);

        // Written beside the target and renamed so an interrupted transfer
        // never leaves a file under the final name.
        let partial = partial_path(dest);
        let mut file = std::fs::File::create(&partial)
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        file.write_all(&buffer)
            .and_then(|_| file.sync_all())
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        std::fs::rename(&partial, dest)
            .with_context(|| format!("Failed to move download into {}", dest.display()))?;

        Ok(buffer.len() as u64)
    }
}

#[async_trait]
impl RemoteSource for FtpSource {
    async fn list(&self) -> Result<Vec<String>> {
        let lines = self
            .with_retry(format!("LIST {}", self.config.remote_dir), Self::list_sync)
            .await?;
        info!("Listed {} ({} entries)", self.config.remote_dir, lines.len());
        Ok(lines)
    }

    async fn fetch(&self, name: &str, dest: &Path) -> Result<u64> {
        let remote_name = name.to_string();
        let dest_path = dest.to_path_buf();
        let bytes = self
            .with_retry(format!("RETR {}", name), move |config| {
                Self::fetch_sync(config, &remote_name, &dest_path)
            })
            .await?;
        info!("Downloaded {} ({} bytes) to {}", name, bytes, dest.display());
        Ok(bytes)
    }
}

/// rustls connector trusting the webpki roots, pinned to the ring provider
fn tls_connector() -> Result<RustlsConnector> {
    let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let provider = Arc::new(suppaftp::rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to configure TLS protocol versions")?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(RustlsConnector::from(Arc::new(config)))
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Greets one client, records its first command and refuses it
    fn refusing_server() -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"220 ready\r\n").unwrap();
            let mut command = String::new();
            BufReader::new(socket.try_clone().unwrap())
                .read_line(&mut command)
                .unwrap();
            socket.write_all(b"530 refused\r\n").unwrap();
            command
        });
        (port, handle)
    }

    fn local_config(port: u16, tls: bool) -> FtpConfig {
        FtpConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: "acct".to_string(),
            password: "hunter2".to_string(),
            tls,
            ..FtpConfig::default()
        }
    }

    #[test]
    fn test_tls_is_negotiated_before_credentials() {
        let (port, server) = refusing_server();
        assert!(FtpSource::connect(&local_config(port, true)).is_err());
        assert_eq!(server.join().unwrap(), "AUTH TLS\r\n");
    }

    #[test]
    fn test_plain_session_logs_in_directly() {
        let (port, server) = refusing_server();
        assert!(FtpSource::connect(&local_config(port, false)).is_err());
        assert_eq!(server.join().unwrap(), "USER acct\r\n");
    }

    #[test]
    fn test_tls_connector_builds() {
        assert!(tls_connector().is_ok());
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let config: FtpConfig = serde_json::from_str(r#"{"host":"ftp.example.com"}"#).unwrap();
        assert_eq!(config.host, "ftp.example.com");
        assert!(config.password.is_empty());
        assert!(config.tls);
        assert_eq!(config.port, 21);
    }

    #[test]
    fn test_ftp_config_default() {
        let config = FtpConfig::default();
        assert!(config.tls);
        assert_eq!(config.port, 21);
        assert_eq!(config.remote_dir, "logs");
        assert_eq!(config.list_pattern, "*.gz *.txt");
    }

    #[test]
    fn test_password_is_not_serialized() {
        let config = FtpConfig {
            password: "hunter2".to_string(),
            ..FtpConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/work/cdr.txt.gz")),
            PathBuf::from("/work/cdr.txt.gz.part")
        );
    }
}

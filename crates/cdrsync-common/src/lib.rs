//! cdrsync common library
//!
//! Ambient pieces shared by the cdrsync workspace members. Today that is the
//! logging setup; domain types live in the `cdrsync` crate.
//!
//! # Example
//!
//! ```no_run
//! use cdrsync_common::logging::{init_logging, LogConfig, LogLevel};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::builder().level(LogLevel::Debug).build().with_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("Application started");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod logging;

pub use logging::{init_logging, LogConfig, LoggingGuard};

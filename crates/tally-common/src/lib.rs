//! Tally Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared plumbing for the tally workspace members.
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment variables
//!
//! # Example
//!
//! ```no_run
//! use tally_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput, LoggingGuard};

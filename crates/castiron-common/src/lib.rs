//! Castiron Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging setup for the Castiron ETL workspace.
//!
//! - **Error Handling**: [`CastironError`] and the [`Result`] alias
//! - **Logging**: `tracing` subscriber configuration driven by `LOG_*` variables
//!
//! # Example
//!
//! ```no_run
//! use castiron_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("worker starting");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

pub use error::{CastironError, Result};

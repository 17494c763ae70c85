//! Castiron ETL Worker Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Event-driven ETL over a MinIO/S3 bucket.
//!
//! # Overview
//!
//! The worker watches one bucket for two kinds of objects:
//!
//! - **Processor configs**: TOML documents (`[castiron.etl]`) naming an
//!   inbox, processing, archive and error directory, a file glob and a
//!   shell command. Uploading one activates it, deleting it deactivates it.
//! - **Data files**: objects dropped into a registered inbox. Each is moved
//!   to processing, handed to the command as a local file, then moved to
//!   archive on success or to error on failure (optionally with the
//!   command's output next to it).
//!
//! # Architecture
//!
//! - [`events`]: notification decoding and the [`events::EventSource`]s
//! - [`router`]: decides whether a notification is a config or a data file
//! - [`registry`]: active configs, at most one per inbox directory
//! - [`pipeline`]: the claim/run/route state machine for one file
//! - [`runner`]: shell command execution with a fixed environment
//! - [`storage`]: the [`storage::ObjectStore`] trait with S3 and in-memory
//!   backends
//! - [`recovery`]: startup repair of interrupted moves
//! - [`worker`]: bucket bootstrap and the consume loop
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use castiron_etl::{config::Config, events::LinesEventSource, runner::ShellCommandRunner,
//!     storage::S3Store, worker::{shutdown_signal, Worker}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let store = Arc::new(S3Store::new(config.storage.clone()));
//!     let runner = Arc::new(ShellCommandRunner::new());
//!     let mut worker = Worker::new(config.worker, config.destination, store, runner);
//!     worker.bootstrap().await?;
//!     worker.run(&mut LinesEventSource::stdin(), shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod paths;
pub mod pipeline;
pub mod processor;
pub mod recovery;
pub mod registry;
pub mod router;
pub mod runner;
pub mod storage;
pub mod worker;

pub use error::{EtlError, EtlResult};
pub use processor::{parse_config, ProcessorConfig};

//! Shared helpers for the castiron-etl integration tests
//!
//! - an in-memory worker fixture for pipeline scenarios
//! - a MinIO container (testcontainers) for tests that need a real store
//!
//! MinIO tests need Docker and are `#[ignore]`d:
//!
//! ```bash
//! cargo test -p castiron-etl --test minio_e2e -- --ignored --nocapture
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use castiron_etl::config::{Config, DestinationConfig};
use castiron_etl::events::LinesEventSource;
use castiron_etl::runner::ShellCommandRunner;
use castiron_etl::storage::{InMemoryStore, ObjectStore, S3Store, StorageConfig};
use castiron_etl::worker::{RunStats, Worker};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use tracing::{debug, info};

pub const BUCKET: &str = "etl";

pub const MINIO_ACCESS_KEY: &str = "minioadmin";
pub const MINIO_SECRET_KEY: &str = "minioadmin";

/// Install a test-friendly subscriber once per test binary
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,castiron_etl=debug,testcontainers=info")),
        )
        .with_test_writer()
        .try_init();
}

/// Render a processor config document
pub fn config_doc(shell: &str, save_error_log: bool) -> Vec<u8> {
    format!(
        r#"
        [castiron.etl]
        enabled = true
        handled_file_glob = "*.csv"
        inbox_dir = "../in"
        processing_dir = "../proc"
        archive_dir = "../arch"
        error_dir = "../err"
        save_error_log = {save_error_log}
        shell = {shell:?}
        "#
    )
    .into_bytes()
}

/// One MinIO notification line as published for `key` in [`BUCKET`]
pub fn event_line(event_name: &str, key: &str) -> String {
    format!(
        r#"{{"EventName":"{event_name}","Key":"{BUCKET}/{key}","Records":[]}}"#
    )
}

pub fn created(key: &str) -> String {
    event_line("s3:ObjectCreated:Put", key)
}

pub fn removed(key: &str) -> String {
    event_line("s3:ObjectRemoved:Delete", key)
}

// ============================================================================
// In-memory worker
// ============================================================================

/// Worker over an in-memory bucket, running commands through the real shell
pub struct MemoryWorker {
    pub store: Arc<InMemoryStore>,
    pub worker: Worker,
}

impl MemoryWorker {
    pub fn new(max_concurrent_files: usize) -> Self {
        let store = Arc::new(InMemoryStore::with_bucket(BUCKET));
        let mut config = Config::default().worker;
        config.bucket = BUCKET.to_string();
        config.max_concurrent_files = max_concurrent_files;

        let worker = Worker::new(
            config,
            DestinationConfig {
                table: "orders".to_string(),
                ..DestinationConfig::default()
            },
            store.clone(),
            Arc::new(ShellCommandRunner::new()),
        );
        Self { store, worker }
    }

    pub async fn put(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.store
            .put(BUCKET, key, data.into())
            .await
            .expect("put should succeed");
    }

    /// Feed `lines` through the consume loop until they run out
    pub async fn consume(&mut self, lines: &[String]) -> RunStats {
        let input = lines.join("\n");
        let mut source = LinesEventSource::new(input.as_bytes());
        self.worker
            .run(&mut source, std::future::pending::<()>())
            .await
            .expect("consume loop should not fail")
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.keys(BUCKET)
    }
}

// ============================================================================
// MinIO Test Container
// ============================================================================

pub struct TestMinio {
    container: ContainerAsync<GenericImage>,
    endpoint: String,
}

impl TestMinio {
    /// Start a MinIO container; the pipeline bucket is not created
    pub async fn start() -> Result<Self> {
        info!("Starting MinIO test container...");

        let container = GenericImage::new("minio/minio", "latest")
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("MinIO Object Storage Server"))
            .with_env_var("MINIO_ROOT_USER", MINIO_ACCESS_KEY)
            .with_env_var("MINIO_ROOT_PASSWORD", MINIO_SECRET_KEY)
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .context("Failed to start MinIO container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get MinIO host")?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .context("Failed to get MinIO port")?;

        let endpoint = format!("http://{}:{}", host, port);
        debug!("MinIO endpoint: {}", endpoint);

        Ok(Self {
            container,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig::for_minio(&self.endpoint)
            .with_credentials(MINIO_ACCESS_KEY, MINIO_SECRET_KEY)
    }

    pub fn store(&self) -> S3Store {
        S3Store::new(self.storage_config())
    }
}

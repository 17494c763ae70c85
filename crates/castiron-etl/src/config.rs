//! Worker configuration

use std::path::PathBuf;
use std::time::Duration;

use castiron_common::CastironError;
use serde::{Deserialize, Serialize};

use crate::storage::StorageConfig;

// ============================================================================
// Worker Configuration Constants
// ============================================================================

/// Default worker name, also the default Kafka consumer group.
pub const DEFAULT_WORKER_NAME: &str = "castiron-etl";

/// Default pipeline bucket.
pub const DEFAULT_BUCKET: &str = "etl";

/// Default suffix identifying processor config objects.
pub const DEFAULT_CONFIG_EXTENSION: &str = ".toml";

/// Default queue ARN MinIO publishes bucket events to.
pub const DEFAULT_NOTIFICATION_ARN: &str = "arn:minio:sqs::primary:kafka";

/// Default number of files transformed at the same time.
pub const DEFAULT_MAX_CONCURRENT_FILES: usize = 1;

/// Default Kafka bootstrap servers.
pub const DEFAULT_KAFKA_BROKER: &str = "localhost:9092";

/// Default topic MinIO bucket notifications land on.
pub const DEFAULT_KAFKA_MINIO_TOPIC: &str = "minio-events";

/// Default destination database host.
pub const DEFAULT_DATABASE_HOST: &str = "localhost";

/// Default destination database port.
pub const DEFAULT_DATABASE_PORT: u16 = 5432;

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub worker: WorkerConfig,
    pub destination: DestinationConfig,
    pub kafka: KafkaConfig,
    pub storage: StorageConfig,
}

/// Pipeline worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    pub bucket: String,
    pub config_extension: String,
    pub notification_arn: String,
    pub max_concurrent_files: usize,
    /// Parent of the per-file scratch directories; the system temp dir if unset
    pub work_dir: Option<PathBuf>,
    pub command_timeout_secs: Option<u64>,
    pub recover_on_startup: bool,
}

impl WorkerConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

/// Where transformation commands load data. Exposed to them as
/// `DATABASE_*` variables.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub host: String,
    pub password: String,
    pub port: u16,
    pub table: String,
    pub user: String,
}

impl std::fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("host", &self.host)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("table", &self.table)
            .field("user", &self.user)
            .finish()
    }
}

/// Kafka transport for bucket notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub broker: String,
    pub topic: String,
    pub group_id: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// `Ok(None)` when unset; a set but unparsable value is an error.
fn env_parse<T>(name: &str) -> castiron_common::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| CastironError::invalid_setting(name, value.as_str(), e)),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let name = env_or("WORKER_NAME", DEFAULT_WORKER_NAME);

        let config = Config {
            worker: WorkerConfig {
                bucket: env_or("ETL_BUCKET", DEFAULT_BUCKET),
                config_extension: env_or("ETL_CONFIG_EXTENSION", DEFAULT_CONFIG_EXTENSION),
                notification_arn: env_or("ETL_NOTIFICATION_ARN", DEFAULT_NOTIFICATION_ARN),
                max_concurrent_files: env_parse("ETL_MAX_CONCURRENT_FILES")?
                    .unwrap_or(DEFAULT_MAX_CONCURRENT_FILES),
                work_dir: std::env::var("ETL_WORK_DIR").ok().map(PathBuf::from),
                command_timeout_secs: env_parse("ETL_COMMAND_TIMEOUT_SECS")?,
                recover_on_startup: env_parse("ETL_RECOVER_ON_STARTUP")?.unwrap_or(true),
                name: name.clone(),
            },
            destination: DestinationConfig {
                host: env_or("DATABASE_HOST", DEFAULT_DATABASE_HOST),
                password: env_or("DATABASE_PASSWORD", ""),
                port: env_parse("DATABASE_PORT")?.unwrap_or(DEFAULT_DATABASE_PORT),
                table: env_or("DATABASE_TABLE", ""),
                user: env_or("DATABASE_USER", ""),
            },
            kafka: KafkaConfig {
                broker: env_or("KAFKA_BROKER", DEFAULT_KAFKA_BROKER),
                topic: env_or("KAFKA_MINIO_TOPIC", DEFAULT_KAFKA_MINIO_TOPIC),
                group_id: env_or("KAFKA_GROUP_ID", &name),
            },
            storage: StorageConfig::from_env(),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> castiron_common::Result<()> {
        if self.worker.bucket.is_empty() {
            return Err(CastironError::config("ETL bucket name cannot be empty"));
        }

        if self.worker.config_extension.is_empty() {
            return Err(CastironError::config("Config extension cannot be empty"));
        }

        if self.worker.max_concurrent_files == 0 {
            return Err(CastironError::config(
                "max_concurrent_files must be greater than 0",
            ));
        }

        if self.worker.command_timeout_secs == Some(0) {
            return Err(CastironError::config(
                "Command timeout must be greater than 0 when set",
            ));
        }

        if self.destination.table.is_empty() {
            tracing::warn!("DATABASE_TABLE is not set - commands will see an empty table name");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: WorkerConfig {
                name: DEFAULT_WORKER_NAME.to_string(),
                bucket: DEFAULT_BUCKET.to_string(),
                config_extension: DEFAULT_CONFIG_EXTENSION.to_string(),
                notification_arn: DEFAULT_NOTIFICATION_ARN.to_string(),
                max_concurrent_files: DEFAULT_MAX_CONCURRENT_FILES,
                work_dir: None,
                command_timeout_secs: None,
                recover_on_startup: true,
            },
            destination: DestinationConfig {
                host: DEFAULT_DATABASE_HOST.to_string(),
                port: DEFAULT_DATABASE_PORT,
                ..DestinationConfig::default()
            },
            kafka: KafkaConfig {
                broker: DEFAULT_KAFKA_BROKER.to_string(),
                topic: DEFAULT_KAFKA_MINIO_TOPIC.to_string(),
                group_id: DEFAULT_WORKER_NAME.to_string(),
            },
            storage: StorageConfig::for_minio("http://localhost:9000"),
        }
    }
}

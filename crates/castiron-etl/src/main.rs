//! Castiron ETL worker - Main entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use castiron_common::logging::{init_logging, LogConfig, LogLevel};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use castiron_etl::{
    config::Config,
    events::{EventSource, LinesEventSource},
    parse_config,
    registry::RegisteredConfig,
    runner::ShellCommandRunner,
    storage::S3Store,
    worker::{shutdown_signal, Worker},
};

#[derive(Parser)]
#[command(name = "castiron-etl", version, about = "Event-driven ETL worker for MinIO buckets")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bootstrap the bucket and process notifications until stopped
    Run {
        /// Where bucket notifications come from
        #[arg(long, value_enum, default_value_t = SourceKind::Stdin)]
        source: SourceKind,

        /// Skip the startup repair of interrupted moves
        #[arg(long)]
        no_recover: bool,
    },
    /// Validate a processor config file and print how it resolves
    Check {
        file: PathBuf,

        /// Object key the config would be uploaded as
        #[arg(long)]
        key: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    /// Newline-delimited MinIO event JSON on stdin
    Stdin,
    /// The Kafka topic MinIO publishes to
    Kafka,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("castiron-etl")
        .filter_directives("aws_config=warn,aws_smithy_runtime=warn,rdkafka=info")
        .build();
    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run { source, no_recover } => run(source, no_recover).await,
        Command::Check { file, key } => check(file, key),
    }
}

async fn run(source: SourceKind, no_recover: bool) -> Result<()> {
    let mut config = Config::load()?;
    if no_recover {
        config.worker.recover_on_startup = false;
    }
    info!(
        worker = %config.worker.name,
        bucket = %config.worker.bucket,
        "Starting Castiron ETL worker"
    );

    let mut source: Box<dyn EventSource> = match source {
        SourceKind::Stdin => Box::new(LinesEventSource::stdin()),
        SourceKind::Kafka => kafka_source(&config)?,
    };

    let store = Arc::new(S3Store::new(config.storage.clone()));
    let runner = Arc::new(ShellCommandRunner::new().with_timeout(config.worker.command_timeout()));
    let mut worker = Worker::new(config.worker, config.destination, store, runner);

    if let Some(report) = worker.bootstrap().await? {
        if !report.stranded.is_empty() || !report.conflicts.is_empty() {
            info!(
                stranded = ?report.stranded,
                conflicts = ?report.conflicts,
                "Files need operator attention"
            );
        }
    }

    let stats = worker.run(source.as_mut(), shutdown_signal()).await?;
    info!(?stats, "Worker stopped");
    Ok(())
}

#[cfg(feature = "kafka")]
fn kafka_source(config: &Config) -> Result<Box<dyn EventSource>> {
    let source = castiron_etl::events::KafkaEventSource::new(&config.kafka)?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "kafka"))]
fn kafka_source(_config: &Config) -> Result<Box<dyn EventSource>> {
    anyhow::bail!("this build has no Kafka support; rebuild with --features kafka or use --source stdin")
}

fn check(file: PathBuf, key: Option<String>) -> Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let config = parse_config(&raw)?;

    let key = match key {
        Some(key) => key,
        None => file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("Config path has no file name")?,
    };
    let entry = RegisteredConfig::new(key.as_str(), config)?;

    println!("[castiron.etl]");
    println!("{}", toml::to_string_pretty(&entry.config)?);
    println!("# resolved for {key}");
    println!("# inbox      = {:?}", entry.dirs.inbox);
    println!("# processing = {:?}", entry.dirs.processing);
    println!("# archive    = {:?}", entry.dirs.archive);
    println!("# error      = {:?}", entry.dirs.error);
    if !entry.config.enabled {
        println!("# disabled: the worker will not register this config");
    }
    Ok(())
}

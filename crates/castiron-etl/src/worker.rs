//! Worker bootstrap and the consume loop.
//!
//! One loop pulls notifications and routes them in delivery order. Config
//! changes and data-file claims always happen on that loop. With
//! `max_concurrent_files > 1` the command stage of claimed files runs on
//! spawned tasks, bounded by a semaphore.

use std::future::Future;
use std::sync::Arc;

use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::config::{DestinationConfig, WorkerConfig};
use crate::error::EtlResult;
use crate::events::EventSource;
use crate::pipeline::{FileOutcome, FilePipeline};
use crate::recovery::{self, RecoveryReport};
use crate::router::{NotificationRouter, RouteOutcome, Routed};
use crate::runner::CommandRunner;
use crate::storage::ObjectStore;

/// Counters for one run of the consume loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub events: u64,
    pub configs_registered: u64,
    pub configs_unregistered: u64,
    pub files_archived: u64,
    pub files_failed: u64,
    pub errors: u64,
}

impl RunStats {
    fn record(&mut self, outcome: &RouteOutcome) {
        match outcome {
            RouteOutcome::ConfigRegistered { .. } => self.configs_registered += 1,
            RouteOutcome::ConfigUnregistered { removed: true, .. } => {
                self.configs_unregistered += 1
            }
            RouteOutcome::File(FileOutcome::Archived { .. }) => self.files_archived += 1,
            RouteOutcome::File(FileOutcome::Failed { .. }) => self.files_failed += 1,
            _ => {}
        }
    }

    fn record_task(&mut self, result: Result<EtlResult<FileOutcome>, JoinError>) {
        match result {
            Ok(Ok(outcome)) => self.record(&RouteOutcome::File(outcome)),
            Ok(Err(e)) => {
                self.errors += 1;
                error!(error = %e, "File processing failed");
            }
            Err(e) => {
                self.errors += 1;
                error!(error = %e, "File processing task panicked");
            }
        }
    }
}

pub struct Worker {
    config: WorkerConfig,
    router: NotificationRouter,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        destination: DestinationConfig,
        store: Arc<dyn ObjectStore>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let pipeline =
            FilePipeline::new(store, runner, destination).with_work_dir(config.work_dir.clone());
        let router =
            NotificationRouter::new(config.bucket.clone(), config.config_extension.clone(), pipeline);
        Self { config, router }
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    /// Prepare the bucket and load existing configs.
    ///
    /// Creates the bucket when missing, subscribes it to the notification
    /// queue, registers every config object already present and, when
    /// enabled, repairs interrupted moves.
    pub async fn bootstrap(&mut self) -> EtlResult<Option<RecoveryReport>> {
        let bucket = self.config.bucket.as_str();
        let store = self.router.pipeline().store().clone();

        if !store.bucket_exists(bucket).await? {
            info!(bucket, "Creating pipeline bucket");
            store.make_bucket(bucket).await?;
        }
        store
            .set_notification_config(bucket, &self.config.notification_arn)
            .await?;

        self.router.load_existing_configs().await?;

        if !self.config.recover_on_startup {
            return Ok(None);
        }
        let report = recovery::recover(store.as_ref(), bucket, self.router.registry()).await?;
        Ok(Some(report))
    }

    /// Consume notifications until the source ends or `shutdown` resolves.
    ///
    /// Per-event failures are logged and counted; only a failing source
    /// ends the loop with an error. In-flight files are always waited for.
    pub async fn run<E, F>(&mut self, source: &mut E, shutdown: F) -> EtlResult<RunStats>
    where
        E: EventSource + ?Sized,
        F: Future<Output = ()>,
    {
        let max_concurrent = self.config.max_concurrent_files.max(1);
        let semaphore = Arc::new(Semaphore::new(max_concurrent));
        let mut tasks: JoinSet<EtlResult<FileOutcome>> = JoinSet::new();
        let mut stats = RunStats::default();
        let mut source_error = None;

        info!(
            worker = %self.config.name,
            bucket = %self.config.bucket,
            max_concurrent,
            "Consuming bucket notifications"
        );

        tokio::pin!(shutdown);
        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer taking events");
                    break;
                }
                next = source.next_event() => next,
            };

            let event = match next {
                Ok(Some(event)) => event,
                Ok(None) => {
                    info!("Event source closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Event source failed");
                    source_error = Some(e);
                    break;
                }
            };
            stats.events += 1;

            if max_concurrent == 1 {
                match self.router.route(&event).await {
                    Ok(outcome) => stats.record(&outcome),
                    Err(e) => {
                        stats.errors += 1;
                        error!(error = %e, key = %event.key, "Failed to handle notification");
                    }
                }
            } else {
                match self.router.route_deferred(&event).await {
                    Ok(Routed::Done(outcome)) => stats.record(&outcome),
                    Ok(Routed::Claimed(claimed)) => {
                        let pipeline = self.router.pipeline().clone();
                        match semaphore.clone().acquire_owned().await {
                            Ok(permit) => {
                                tasks.spawn(async move {
                                    let outcome = pipeline.process(claimed).await;
                                    drop(permit);
                                    outcome
                                });
                            }
                            Err(_) => stats.record_task(Ok(pipeline.process(claimed).await)),
                        }
                    }
                    Err(e) => {
                        stats.errors += 1;
                        error!(error = %e, key = %event.key, "Failed to handle notification");
                    }
                }

                while let Some(result) = tasks.try_join_next() {
                    stats.record_task(result);
                }
            }

            if let Err(e) = source.ack().await {
                warn!(error = %e, "Failed to acknowledge notification");
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight files");
        }
        while let Some(result) = tasks.join_next().await {
            stats.record_task(result);
        }

        info!(
            events = stats.events,
            archived = stats.files_archived,
            failed = stats.files_failed,
            errors = stats.errors,
            "Consume loop stopped"
        );

        match source_error {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

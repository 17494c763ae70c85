//! Dispatch of bucket notifications.
//!
//! Objects whose key ends with the config extension are processor configs;
//! every other created object is a candidate data file. Events for other
//! buckets and removals of data files are ignored.

use tracing::{debug, info, instrument, warn};

use crate::error::{EtlError, EtlResult};
use crate::events::{Notification, NotificationAction};
use crate::pipeline::{ClaimedFile, FileOutcome, FilePipeline};
use crate::processor::parse_config;
use crate::registry::ConfigRegistry;

/// What a notification led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Another bucket, or a removed data file
    Ignored,
    ConfigRegistered { key: String },
    /// Invalid, disabled, or colliding with another config's inbox
    ConfigDropped { key: String },
    ConfigUnregistered { key: String, removed: bool },
    File(FileOutcome),
}

/// Routing result before a claimed file's command has run.
#[derive(Debug)]
pub enum Routed {
    Done(RouteOutcome),
    /// The file is in its processing directory; hand it to
    /// [`FilePipeline::process`]
    Claimed(ClaimedFile),
}

pub struct NotificationRouter {
    bucket: String,
    config_extension: String,
    registry: ConfigRegistry,
    pipeline: FilePipeline,
}

impl NotificationRouter {
    pub fn new(
        bucket: impl Into<String>,
        config_extension: impl Into<String>,
        pipeline: FilePipeline,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            config_extension: config_extension.into(),
            registry: ConfigRegistry::new(),
            pipeline,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &FilePipeline {
        &self.pipeline
    }

    fn is_config(&self, key: &str) -> bool {
        key.ends_with(&self.config_extension)
    }

    /// Handle one notification to completion, running the command inline.
    pub async fn route(&mut self, event: &Notification) -> EtlResult<RouteOutcome> {
        match self.route_deferred(event).await? {
            Routed::Done(outcome) => Ok(outcome),
            Routed::Claimed(claimed) => {
                Ok(RouteOutcome::File(self.pipeline.process(claimed).await?))
            }
        }
    }

    /// Handle one notification up to the point where a data file has been
    /// claimed. Registry changes and claims happen here, in event order.
    #[instrument(
        name = "route",
        skip_all,
        fields(action = ?event.action, bucket = %event.bucket, key = %event.key)
    )]
    pub async fn route_deferred(&mut self, event: &Notification) -> EtlResult<Routed> {
        if event.bucket != self.bucket {
            debug!("Event for another bucket");
            return Ok(Routed::Done(RouteOutcome::Ignored));
        }

        match event.action {
            NotificationAction::Removed if self.is_config(&event.key) => {
                let removed = self.registry.unregister(&event.key);
                if removed {
                    info!(config = %event.key, "Processor config unregistered");
                }
                Ok(Routed::Done(RouteOutcome::ConfigUnregistered {
                    key: event.key.clone(),
                    removed,
                }))
            }
            NotificationAction::Removed => Ok(Routed::Done(RouteOutcome::Ignored)),
            NotificationAction::Created if self.is_config(&event.key) => {
                let outcome = self.load_config(&event.key).await?;
                Ok(Routed::Done(outcome))
            }
            NotificationAction::Created => {
                let claimed = self
                    .pipeline
                    .claim(&self.registry, &self.bucket, &event.key)
                    .await?;
                Ok(match claimed {
                    Some(claimed) => Routed::Claimed(claimed),
                    None => Routed::Done(RouteOutcome::File(FileOutcome::NotHandled)),
                })
            }
        }
    }

    /// Register every config object already in the bucket, as if each had
    /// just been uploaded. Returns how many are active afterwards.
    pub async fn load_existing_configs(&mut self) -> EtlResult<usize> {
        let keys: Vec<String> = self
            .pipeline
            .store()
            .list(&self.bucket, "", true)
            .await?
            .into_iter()
            .filter(|key| self.is_config(key))
            .collect();

        for key in &keys {
            if let Err(e) = self.load_config(key).await {
                warn!(config = %key, error = %e, "Failed to load existing processor config");
            }
        }

        info!(
            bucket = %self.bucket,
            active = self.registry.len(),
            "Existing processor configs loaded"
        );
        Ok(self.registry.len())
    }

    /// Fetch, parse and register one config object. Parse failures,
    /// disabled documents and rejected registrations drop the document
    /// without touching the registry.
    async fn load_config(&mut self, key: &str) -> EtlResult<RouteOutcome> {
        let raw = self.pipeline.store().get(&self.bucket, key).await?;
        let dropped = RouteOutcome::ConfigDropped {
            key: key.to_string(),
        };

        let config = match std::str::from_utf8(&raw)
            .map_err(EtlError::config_parse)
            .and_then(parse_config)
        {
            Ok(config) => config,
            Err(e) => {
                warn!(config = %key, error = %e, "Dropping invalid processor config");
                return Ok(dropped);
            }
        };

        // only a removal event takes an active config out of the registry
        if !config.enabled {
            debug!(config = %key, "Ignoring disabled processor config");
            return Ok(dropped);
        }

        let dirs = match self.registry.register(key, config) {
            Ok(entry) => entry.dirs.clone(),
            Err(e @ EtlError::InboxConflict { .. }) | Err(e @ EtlError::InvalidPath(_)) => {
                warn!(config = %key, error = %e, "Rejecting processor config");
                return Ok(dropped);
            }
            Err(e) => return Err(e),
        };

        self.pipeline.ensure_markers(&self.bucket, &dirs).await?;
        info!(config = %key, inbox = %dirs.inbox, "Processor config registered");

        Ok(RouteOutcome::ConfigRegistered {
            key: key.to_string(),
        })
    }
}

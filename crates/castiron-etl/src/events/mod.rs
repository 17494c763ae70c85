//! Bucket change notifications and the sources that deliver them.
//!
//! MinIO publishes one JSON document per object event:
//!
//! ```json
//! {"EventName": "s3:ObjectCreated:Put", "Key": "etl/in/orders.csv", "Records": [...]}
//! ```
//!
//! `Key` is `<bucket>/<object key>`. Only the top-level fields are read.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{EtlError, EtlResult};

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod lines;

#[cfg(feature = "kafka")]
pub use kafka::KafkaEventSource;
pub use lines::LinesEventSource;

const CREATED_PREFIX: &str = "s3:ObjectCreated";
const REMOVED_PREFIX: &str = "s3:ObjectRemoved";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    Created,
    Removed,
}

/// One object event in the pipeline's terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub action: NotificationAction,
    pub bucket: String,
    pub key: String,
}

impl Notification {
    pub fn created(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            action: NotificationAction::Created,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub fn removed(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            action: NotificationAction::Removed,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Decode a MinIO notification document.
    ///
    /// Returns `Ok(None)` for event kinds the pipeline does not act on
    /// (metadata, replication, access events).
    pub fn decode(payload: &[u8]) -> EtlResult<Option<Self>> {
        let raw: MinioNotification = serde_json::from_slice(payload)
            .map_err(|e| EtlError::Notification(e.to_string()))?;

        let action = if raw.event_name.starts_with(CREATED_PREFIX) {
            NotificationAction::Created
        } else if raw.event_name.starts_with(REMOVED_PREFIX) {
            NotificationAction::Removed
        } else {
            debug!(event = %raw.event_name, key = %raw.key, "Ignoring notification");
            return Ok(None);
        };

        let (bucket, key) = raw.key.split_once('/').ok_or_else(|| {
            EtlError::Notification(format!("key {:?} has no bucket prefix", raw.key))
        })?;
        if bucket.is_empty() || key.is_empty() {
            return Err(EtlError::Notification(format!(
                "key {:?} does not name an object",
                raw.key
            )));
        }

        Ok(Some(Self {
            action,
            bucket: bucket.to_string(),
            key: key.to_string(),
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MinioNotification {
    event_name: String,
    key: String,
    #[serde(default)]
    #[allow(dead_code)]
    records: Vec<serde_json::Value>,
}

/// Ordered, at-least-once stream of notifications.
///
/// Payloads that cannot be decoded are logged and skipped by the source;
/// they never reach the consumer.
#[async_trait]
pub trait EventSource: Send {
    /// Wait for the next notification. `None` means the stream has ended.
    async fn next_event(&mut self) -> EtlResult<Option<Notification>>;

    /// Mark the last returned notification as handled.
    async fn ack(&mut self) -> EtlResult<()> {
        Ok(())
    }
}

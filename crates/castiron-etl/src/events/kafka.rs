//! Notifications from the Kafka topic MinIO publishes bucket events to.
//!
//! Offsets are committed by hand once the consumer has handled an event, so
//! a crash mid-file redelivers that file's notification.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use super::{EventSource, Notification};
use crate::config::KafkaConfig;
use crate::error::{EtlError, EtlResult};

/// Pause after a failed receive before polling again
const RECV_RETRY_DELAY: Duration = Duration::from_secs(1);

struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

pub struct KafkaEventSource {
    consumer: StreamConsumer,
    pending: Option<Position>,
}

impl KafkaEventSource {
    pub fn new(config: &KafkaConfig) -> EtlResult<Self> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.group_id)
            .set("bootstrap.servers", &config.broker)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| EtlError::Notification(format!("Failed to create Kafka consumer: {e}")))?;

        consumer.subscribe(&[&config.topic]).map_err(|e| {
            EtlError::Notification(format!("Failed to subscribe to {}: {e}", config.topic))
        })?;

        info!(broker = %config.broker, topic = %config.topic, group = %config.group_id, "Kafka consumer subscribed");
        Ok(Self {
            consumer,
            pending: None,
        })
    }

    fn commit(&self, position: &Position) -> EtlResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &position.topic,
            position.partition,
            Offset::Offset(position.offset + 1),
        )
        .map_err(|e| EtlError::Notification(e.to_string()))?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| EtlError::Notification(format!("Failed to commit offset: {e}")))
    }
}

#[async_trait]
impl EventSource for KafkaEventSource {
    async fn next_event(&mut self) -> EtlResult<Option<Notification>> {
        loop {
            let message = match self.consumer.recv().await {
                Ok(message) => message,
                Err(e) => {
                    warn!(error = %e, retry_in_ms = RECV_RETRY_DELAY.as_millis() as u64, "Kafka receive failed");
                    tokio::time::sleep(RECV_RETRY_DELAY).await;
                    continue;
                }
            };

            let position = Position {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            };

            let decoded = match message.payload() {
                Some(payload) => Notification::decode(payload),
                None => Ok(None),
            };

            match decoded {
                Ok(Some(notification)) => {
                    self.pending = Some(position);
                    return Ok(Some(notification));
                }
                Ok(None) => {
                    debug!(partition = position.partition, offset = position.offset, "Skipping event");
                    self.commit(&position)?;
                }
                Err(e) => {
                    warn!(
                        partition = position.partition,
                        offset = position.offset,
                        error = %e,
                        "Skipping undecodable notification"
                    );
                    self.commit(&position)?;
                }
            }
        }
    }

    async fn ack(&mut self) -> EtlResult<()> {
        match self.pending.take() {
            Some(position) => self.commit(&position),
            None => Ok(()),
        }
    }
}

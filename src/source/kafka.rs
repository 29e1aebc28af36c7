//! Kafka record source.
//!
//! Subscribes to a single topic with a consumer group and hands out payloads
//! in bounded batches. Offsets are committed by librdkafka's auto-commit, so
//! delivery is at-least-once.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use snafu::prelude::*;
use std::time::Duration;
use tracing::{info, warn};

use super::RecordSource;
use crate::config::SourceConfig;
use crate::error::{ConsumerCreateSnafu, ReceiveSnafu, SourceError, SubscribeSnafu};

/// Consumer for the archived topic.
pub struct KafkaSource {
    consumer: StreamConsumer,
    poll_timeout: Duration,
    max_batch_size: usize,
}

impl KafkaSource {
    /// Connect and subscribe according to `config`.
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = client_config(config)
            .create()
            .context(ConsumerCreateSnafu)?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .context(SubscribeSnafu {
                topic: config.topic.clone(),
            })?;

        info!(
            brokers = %config.brokers,
            topic = %config.topic,
            group_id = %config.group_id,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer,
            poll_timeout: config.poll_timeout(),
            max_batch_size: config.max_batch_size,
        })
    }
}

/// librdkafka properties for the consumer. User-supplied options are applied
/// last and override the defaults.
fn client_config(config: &SourceConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("client.id", &config.client_id);

    if config.start_from_earliest {
        client.set("auto.offset.reset", "earliest");
    }

    for (key, value) in &config.consumer_options {
        client.set(key, value);
    }

    client
}

#[async_trait]
impl RecordSource for KafkaSource {
    async fn poll_batch(&mut self) -> Result<Option<Vec<String>>, SourceError> {
        let mut batch = Vec::new();
        let deadline = tokio::time::sleep(self.poll_timeout);
        tokio::pin!(deadline);

        while batch.len() < self.max_batch_size {
            tokio::select! {
                biased;

                message = self.consumer.recv() => {
                    let message = message.context(ReceiveSnafu)?;
                    match message.payload_view::<str>() {
                        Some(Ok(text)) if !text.is_empty() => batch.push(text.to_string()),
                        Some(Err(e)) => warn!(
                            partition = message.partition(),
                            offset = message.offset(),
                            "Skipping non UTF-8 payload: {}", e
                        ),
                        _ => warn!(
                            partition = message.partition(),
                            offset = message.offset(),
                            "Skipping message without payload"
                        ),
                    }
                }

                _ = &mut deadline => break,
            }
        }

        Ok(Some(batch))
    }
}

//! Kafka-backed click log reader
//!
//! Offsets are auto-committed on an interval, independent of whether the
//! clicks they cover were processed.

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::Message;
use tracing::info;

use super::source::{LogMessage, MessageSource, SourceError};
use crate::config::KafkaConfig;

pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSource {
    /// Join the consumer group and subscribe to the click topic
    pub fn new(config: &KafkaConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", config.brokers.join(","))
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", config.commit_interval_ms.to_string())
            .set("auto.offset.reset", "latest")
            .set("fetch.wait.max.ms", "500")
            .create()
            .map_err(read_error)?;

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(read_error)?;

        info!(
            brokers = %config.brokers.join(","),
            topic = %config.topic,
            group = %config.consumer_group,
            "Subscribed to click log"
        );

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }
}

fn read_error(err: KafkaError) -> SourceError {
    SourceError::Read(err.to_string())
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn recv(&mut self) -> Result<LogMessage, SourceError> {
        let message = self.consumer.recv().await.map_err(read_error)?;
        Ok(LogMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Unsubscribed from click log");
        Ok(())
    }
}

//! In-process message source
//!
//! Backs file replays from the admin CLI and the ingestion tests. Offsets are
//! assigned by the producer, starting at zero, on a single partition.

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::source::{LogMessage, MessageSource, SourceError};

#[derive(Clone)]
pub struct ChannelProducer {
    topic: String,
    sender: mpsc::Sender<LogMessage>,
    next_offset: Arc<AtomicI64>,
}

pub struct ChannelSource {
    receiver: mpsc::Receiver<LogMessage>,
    pulled: Arc<AtomicU64>,
}

impl ChannelSource {
    /// Bounded in-process log with room for `capacity` unread messages
    pub fn new(topic: &str, capacity: usize) -> (ChannelProducer, ChannelSource) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let producer = ChannelProducer {
            topic: topic.to_string(),
            sender,
            next_offset: Arc::new(AtomicI64::new(0)),
        };
        let source = ChannelSource {
            receiver,
            pulled: Arc::new(AtomicU64::new(0)),
        };
        (producer, source)
    }

    /// Shared count of messages handed out by `recv`
    pub fn pulled(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.pulled)
    }
}

impl ChannelProducer {
    /// Append a payload at the next offset, waiting for room if the log is full
    pub async fn publish(&self, payload: impl Into<Vec<u8>>) -> Result<LogMessage, SourceError> {
        let message = LogMessage {
            topic: self.topic.clone(),
            partition: 0,
            offset: self.next_offset.fetch_add(1, Ordering::SeqCst),
            payload: payload.into(),
        };
        self.send(message.clone()).await?;
        Ok(message)
    }

    /// Deliver a message as-is, e.g. to replay an already published offset
    pub async fn send(&self, message: LogMessage) -> Result<(), SourceError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| SourceError::Closed)
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Result<LogMessage, SourceError> {
        match self.receiver.recv().await {
            Some(message) => {
                self.pulled.fetch_add(1, Ordering::SeqCst);
                Ok(message)
            }
            None => Err(SourceError::Closed),
        }
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.receiver.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offsets_are_sequential() {
        let (producer, mut source) = ChannelSource::new("ad_clicks", 8);
        producer.publish("a").await.unwrap();
        producer.publish("b").await.unwrap();

        let first = source.recv().await.unwrap();
        let second = source.recv().await.unwrap();
        assert_eq!((first.offset, second.offset), (0, 1));
        assert_eq!(second.payload, b"b".to_vec());
        assert_eq!(source.pulled().load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_producer_closes_source() {
        let (producer, mut source) = ChannelSource::new("ad_clicks", 8);
        drop(producer);
        assert!(matches!(source.recv().await, Err(SourceError::Closed)));
    }

    #[tokio::test]
    async fn test_closed_source_rejects_sends() {
        let (producer, mut source) = ChannelSource::new("ad_clicks", 8);
        source.close().await.unwrap();
        assert!(matches!(producer.publish("a").await, Err(SourceError::Closed)));
    }
}

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ClickEvent;

/// One record read from the click log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

impl LogMessage {
    /// Stable identity of this delivery position, `<topic>:<partition>:<offset>`.
    /// A redelivered message carries the same token.
    pub fn delivery_token(&self) -> String {
        format!("{}:{}:{}", self.topic, self.partition, self.offset)
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("log read failed: {0}")]
    Read(String),
    /// The source has no more messages and never will
    #[error("log source closed")]
    Closed,
}

/// A consumer-group bound reader over the click log.
///
/// `recv` must be cancel-safe: dropping its future before completion must not
/// lose a message, because the ingestion loop races it against shutdown and
/// the per-pull timeout.
#[async_trait]
pub trait MessageSource: Send {
    async fn recv(&mut self) -> Result<LogMessage, SourceError>;

    /// Stop fetching and release the underlying reader
    async fn close(&mut self) -> Result<(), SourceError>;
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed click payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("click payload has an empty ad_id")]
    MissingAdId,
}

/// Decode a log payload into a click event
pub fn parse_click(payload: &[u8]) -> Result<ClickEvent, ParseError> {
    let event: ClickEvent = serde_json::from_slice(payload)?;
    if event.ad_id.trim().is_empty() {
        return Err(ParseError::MissingAdId);
    }
    Ok(event)
}

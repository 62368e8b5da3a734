//! Click ingestion
//!
//! A single puller reads click messages from the log and hands parsed events
//! to a fixed pool of workers that run them through the analytics aggregator.

pub mod channel;
pub mod consumer;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod pool;
pub mod source;

pub use channel::{ChannelProducer, ChannelSource};
pub use consumer::{IngestSettings, IngestStats, IngestStatsSnapshot, IngestionLoop, LoopState};
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
pub use pool::{ClickJob, Dispatch, DrainReport, JobHandler, WorkerPool};
pub use source::{parse_click, LogMessage, MessageSource, ParseError, SourceError};

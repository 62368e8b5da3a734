use crate::models::{Ad, ClickEvent, StoredEventRecord};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection, pool or timeout failure
    #[error("event store unavailable: {0}")]
    Unavailable(String),
    /// Permanent rejection such as a constraint violation
    #[error("event store rejected the write: {0}")]
    WriteRejected(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => StorageError::WriteRejected(db.to_string()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StorageError::Unavailable(err.to_string()),
            other => StorageError::Other(other.into()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Append-only store of processed click events, and the authoritative ad list
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Append one record, returning its generated identifier
    async fn insert(&self, record: &StoredEventRecord) -> StorageResult<i64>;

    /// Every stored record in insertion order
    async fn query_all(&self) -> StorageResult<Vec<StoredEventRecord>>;

    /// Most recent records for one ad, newest first
    async fn events_for_ad(&self, ad_id: &str, limit: i64) -> StorageResult<Vec<StoredEventRecord>>;

    /// All ads, ordered by identifier
    async fn list_ads(&self) -> StorageResult<Vec<Ad>>;

    /// Insert an ad or replace the one with the same identifier
    async fn upsert_ad(&self, ad: &Ad) -> StorageResult<()>;
}

/// Timestamps are stored as fixed-width RFC 3339 text so that lexical order
/// matches chronological order.
pub(crate) fn encode_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(column: &str, raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Other(anyhow!("invalid {column} '{raw}': {e}")))
}

/// Row shape shared by the SQL backends
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    pub id: i64,
    pub ad_id: String,
    pub timestamp: String,
    pub ip: String,
    pub playback_seconds: i64,
    pub user_agent: Option<String>,
    pub processed_at: String,
}

impl TryFrom<EventRow> for StoredEventRecord {
    type Error = StorageError;

    fn try_from(row: EventRow) -> StorageResult<Self> {
        let playback_seconds = u32::try_from(row.playback_seconds).map_err(|_| {
            StorageError::Other(anyhow!(
                "invalid playback_seconds {} for event {}",
                row.playback_seconds,
                row.id
            ))
        })?;

        Ok(StoredEventRecord {
            id: Some(row.id),
            event: ClickEvent {
                ad_id: row.ad_id,
                timestamp: decode_timestamp("timestamp", &row.timestamp)?,
                ip: row.ip,
                playback_seconds,
                user_agent: row.user_agent,
            },
            processed_at: decode_timestamp("processed_at", &row.processed_at)?,
        })
    }
}

pub(crate) fn rows_to_records(rows: Vec<EventRow>) -> StorageResult<Vec<StoredEventRecord>> {
    rows.into_iter().map(StoredEventRecord::try_from).collect()
}

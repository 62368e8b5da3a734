use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterError {
    /// Network failure, timeout or pool exhaustion
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    /// The store answered with something we could not interpret
    #[error("counter store protocol error: {0}")]
    Protocol(String),
}

pub type CounterResult<T> = Result<T, CounterError>;

/// One mutation inside a pipelined batch
#[derive(Debug, Clone, PartialEq)]
pub enum CounterCommand {
    Increment { key: String },
    Expire { key: String, ttl: Duration },
    AddToOrderedSet { key: String, score: f64, member: String },
    SetString { key: String, value: String, ttl: Duration },
}

impl CounterCommand {
    pub fn key(&self) -> &str {
        match self {
            CounterCommand::Increment { key }
            | CounterCommand::Expire { key, .. }
            | CounterCommand::AddToOrderedSet { key, .. }
            | CounterCommand::SetString { key, .. } => key,
        }
    }
}

/// Key-value counter store shared by every ingestion worker.
///
/// Implementations must be safe for concurrent use; callers never lock around them.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment an integer key, returning the new value
    async fn increment(&self, key: &str) -> CounterResult<i64>;

    /// Set a time-to-live on an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> CounterResult<()>;

    /// Add (or re-score) a member of an ordered set
    async fn add_to_ordered_set(&self, key: &str, score: f64, member: &str) -> CounterResult<()>;

    /// Count ordered-set members with `min <= score <= max`
    async fn count_in_range(&self, key: &str, min: f64, max: f64) -> CounterResult<u64>;

    async fn get_string(&self, key: &str) -> CounterResult<Option<String>>;

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<()>;

    /// Write `key` only if it does not exist yet. Returns `true` when written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<bool>;

    async fn delete(&self, key: &str) -> CounterResult<()>;

    /// Submit all commands as one unit that other clients never see half done.
    ///
    /// A [`CounterError::Unavailable`] failure means the batch was not
    /// applied (except on a timeout, where it may have been). A
    /// [`CounterError::Protocol`] failure may leave part of the batch applied.
    async fn execute_batch(&self, commands: Vec<CounterCommand>) -> CounterResult<()>;
}

//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickpulse::counters::{CounterCommand, CounterError, CounterResult, CounterStore, InMemoryCounterStore};
use clickpulse::models::ClickEvent;
use clickpulse::storage::{EventStore, SqliteStorage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub async fn create_sqlite_storage() -> Arc<SqliteStorage> {
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

pub fn click(ad_id: &str, ip: &str, timestamp: DateTime<Utc>) -> ClickEvent {
    ClickEvent {
        ad_id: ad_id.to_string(),
        timestamp,
        ip: ip.to_string(),
        playback_seconds: 12,
        user_agent: None,
    }
}

pub fn click_payload(ad_id: &str, ip: &str, timestamp: DateTime<Utc>) -> String {
    serde_json::to_string(&click(ad_id, ip, timestamp)).unwrap()
}

/// Counter store that delays batches and can reject them per ad
pub struct ScriptedCounterStore {
    pub inner: Arc<InMemoryCounterStore>,
    batch_delay: Duration,
    failing_ad: Option<String>,
    pub batches_started: AtomicU64,
    pub batches_finished: AtomicU64,
}

impl ScriptedCounterStore {
    pub fn new(inner: Arc<InMemoryCounterStore>) -> Self {
        Self {
            inner,
            batch_delay: Duration::ZERO,
            failing_ad: None,
            batches_started: AtomicU64::new(0),
            batches_finished: AtomicU64::new(0),
        }
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Reject every batch touching counters of `ad_id`
    pub fn failing_for(mut self, ad_id: &str) -> Self {
        self.failing_ad = Some(ad_id.to_string());
        self
    }

    pub fn started(&self) -> u64 {
        self.batches_started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> u64 {
        self.batches_finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for ScriptedCounterStore {
    async fn increment(&self, key: &str) -> CounterResult<i64> {
        self.inner.increment(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CounterResult<()> {
        self.inner.expire(key, ttl).await
    }

    async fn add_to_ordered_set(&self, key: &str, score: f64, member: &str) -> CounterResult<()> {
        self.inner.add_to_ordered_set(key, score, member).await
    }

    async fn count_in_range(&self, key: &str, min: f64, max: f64) -> CounterResult<u64> {
        self.inner.count_in_range(key, min, max).await
    }

    async fn get_string(&self, key: &str) -> CounterResult<Option<String>> {
        self.inner.get_string(key).await
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<()> {
        self.inner.set_string(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<bool> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CounterResult<()> {
        self.inner.delete(key).await
    }

    async fn execute_batch(&self, commands: Vec<CounterCommand>) -> CounterResult<()> {
        self.batches_started.fetch_add(1, Ordering::SeqCst);
        if !self.batch_delay.is_zero() {
            tokio::time::sleep(self.batch_delay).await;
        }

        if let Some(ad_id) = &self.failing_ad {
            let total = format!("total:{ad_id}");
            if commands.iter().any(|command| command.key() == total) {
                return Err(CounterError::Unavailable("scripted failure".to_string()));
            }
        }

        let result = self.inner.execute_batch(commands).await;
        self.batches_finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Poll until `condition` holds, failing the test after a few seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

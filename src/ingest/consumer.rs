//! The ingestion loop
//!
//! Lifecycle: `Starting → Running → Draining → Stopped`. While running, one
//! puller reads the log with a bounded per-pull wait; an idle timeout is not an
//! error. On shutdown the puller stops fetching, closes the source and waits
//! for every dispatched click (bounded by the drain timeout, if configured).
//! A click still waiting for a queue slot when shutdown arrives is abandoned.
//!
//! Offsets are committed by the source independently of processing, so a
//! crash can redeliver clicks that were already counted.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::pool::{ClickJob, Dispatch, JobHandler, WorkerPool};
use super::source::{parse_click, LogMessage, MessageSource, SourceError};
use crate::analytics::{AnalyticsAggregator, RecordOutcome};
use crate::config::{IngestConfig, QueueFullPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub queue_full_policy: QueueFullPolicy,
    pub poll_timeout: Duration,
    pub read_backoff: Duration,
    pub drain_timeout: Option<Duration>,
    /// When set, each delivery is claimed for this long before it is applied
    pub dedup_ttl: Option<Duration>,
}

impl From<&IngestConfig> for IngestSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            queue_full_policy: config.queue_full_policy,
            poll_timeout: config.poll_timeout(),
            read_backoff: config.read_backoff(),
            drain_timeout: config.drain_timeout(),
            dedup_ttl: config.dedup_ttl(),
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

#[derive(Debug, Default)]
pub struct IngestStats {
    received: AtomicU64,
    parse_failures: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    duplicates: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub received: u64,
    pub parse_failures: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub abandoned: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            received: self.received.load(Ordering::SeqCst),
            parse_failures: self.parse_failures.load(Ordering::SeqCst),
            dispatched: self.dispatched.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            processed: self.processed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            duplicates: self.duplicates.load(Ordering::SeqCst),
            abandoned: self.abandoned.load(Ordering::SeqCst),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::SeqCst);
}

/// Runs one click through the aggregator on a worker
struct ClickProcessor {
    aggregator: Arc<AnalyticsAggregator>,
    dedup_ttl: Option<Duration>,
    stats: Arc<IngestStats>,
}

#[async_trait]
impl JobHandler for ClickProcessor {
    async fn handle(&self, job: ClickJob) {
        let ClickJob { event, token } = job;
        let result = match self.dedup_ttl {
            Some(ttl) => self.aggregator.record_event_once(&event, &token, ttl).await,
            None => self.aggregator.record_event(&event).await,
        };

        match result {
            Ok(RecordOutcome::Recorded { event_id }) => {
                bump(&self.stats.processed);
                debug!(ad_id = %event.ad_id, ?event_id, token = %token, "Processed click event");
            }
            Ok(RecordOutcome::Duplicate) => {
                bump(&self.stats.duplicates);
                info!(ad_id = %event.ad_id, token = %token, "Skipped redelivered click event");
            }
            Err(err) => {
                bump(&self.stats.failed);
                error!(ad_id = %event.ad_id, token = %token, error = %err, "Failed to process click event");
            }
        }
    }
}

pub struct IngestionLoop<S> {
    source: S,
    aggregator: Arc<AnalyticsAggregator>,
    settings: IngestSettings,
    stats: Arc<IngestStats>,
    state: watch::Sender<LoopState>,
}

impl<S: MessageSource> IngestionLoop<S> {
    /// Bind a loop to an already opened source
    pub fn new(source: S, aggregator: Arc<AnalyticsAggregator>, settings: IngestSettings) -> Self {
        let (state, _) = watch::channel(LoopState::Starting);
        Self {
            source,
            aggregator,
            settings,
            stats: Arc::new(IngestStats::default()),
            state,
        }
    }

    /// Observe lifecycle transitions
    pub fn state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    fn transition(&self, next: LoopState) {
        self.state.send_replace(next);
        info!(state = ?next, "Ingestion loop state changed");
    }

    /// Consume until `shutdown` flips to `true` (or its sender goes away) or
    /// the source ends, then drain.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> IngestStatsSnapshot {
        let processor = Arc::new(ClickProcessor {
            aggregator: Arc::clone(&self.aggregator),
            dedup_ttl: self.settings.dedup_ttl,
            stats: Arc::clone(&self.stats),
        });
        let pool = WorkerPool::spawn(
            self.settings.workers,
            self.settings.queue_capacity,
            self.settings.queue_full_policy,
            processor,
        );

        info!(
            workers = self.settings.workers,
            queue_capacity = self.settings.queue_capacity,
            policy = ?self.settings.queue_full_policy,
            dedup = self.settings.dedup_ttl.is_some(),
            "Click ingestion started"
        );
        self.transition(LoopState::Running);

        loop {
            if *shutdown.borrow_and_update() {
                info!("Shutdown requested, stopping click ingestion");
                break;
            }

            let pulled = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown handle dropped, stopping click ingestion");
                        break;
                    }
                    continue;
                }
                pulled = tokio::time::timeout(self.settings.poll_timeout, self.source.recv()) => pulled,
            };

            match pulled {
                Err(_) => {
                    debug!("No click message within poll timeout");
                }
                Ok(Ok(message)) => {
                    let Some(job) = parse_job(&self.stats, &message) else {
                        continue;
                    };
                    tokio::select! {
                        biased;
                        dispatched = pool.dispatch(job) => record_dispatch(&self.stats, &message, dispatched),
                        _ = stop_requested(&mut shutdown) => {
                            bump(&self.stats.abandoned);
                            warn!(
                                partition = message.partition,
                                offset = message.offset,
                                "Shutdown while waiting for a worker slot, abandoning click event"
                            );
                            break;
                        }
                    }
                }
                Ok(Err(SourceError::Closed)) => {
                    info!("Click log closed, stopping click ingestion");
                    break;
                }
                Ok(Err(err)) => {
                    warn!(error = %err, backoff_ms = self.settings.read_backoff.as_millis() as u64, "Error reading click log");
                    tokio::select! {
                        biased;
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(self.settings.read_backoff) => {}
                    }
                }
            }
        }

        self.transition(LoopState::Draining);
        if let Err(err) = self.source.close().await {
            warn!(error = %err, "Error closing click log reader");
        }

        info!(
            in_flight = pool.in_flight(),
            queued = pool.queued(),
            "Waiting for dispatched click events"
        );
        let report = pool.shutdown(self.settings.drain_timeout).await;
        self.stats
            .abandoned
            .fetch_add(report.abandoned() as u64, Ordering::SeqCst);

        self.transition(LoopState::Stopped);
        let snapshot = self.stats.snapshot();
        info!(
            received = snapshot.received,
            processed = snapshot.processed,
            failed = snapshot.failed,
            parse_failures = snapshot.parse_failures,
            dropped = snapshot.dropped,
            duplicates = snapshot.duplicates,
            abandoned = snapshot.abandoned,
            "All processing workers completed"
        );
        snapshot
    }
}

/// Resolves once shutdown is requested or its sender is gone
async fn stop_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Parse one message into a job for the pool
fn parse_job(stats: &IngestStats, message: &LogMessage) -> Option<ClickJob> {
    bump(&stats.received);

    let event = match parse_click(&message.payload) {
        Ok(event) => event,
        Err(err) => {
            bump(&stats.parse_failures);
            warn!(
                partition = message.partition,
                offset = message.offset,
                error = %err,
                raw = %String::from_utf8_lossy(&message.payload),
                "Dropping malformed click message"
            );
            return None;
        }
    };

    debug!(
        partition = message.partition,
        offset = message.offset,
        ad_id = %event.ad_id,
        ip = %event.ip,
        playback_seconds = event.playback_seconds,
        "Received click event"
    );

    Some(ClickJob {
        event,
        token: message.delivery_token(),
    })
}

fn record_dispatch(stats: &IngestStats, message: &LogMessage, dispatched: Dispatch) {
    match dispatched {
        Dispatch::Queued => bump(&stats.dispatched),
        Dispatch::Dropped => {
            bump(&stats.dropped);
            warn!(
                partition = message.partition,
                offset = message.offset,
                "Worker queue full, dropping click event"
            );
        }
        Dispatch::Closed => {
            bump(&stats.dropped);
            error!(offset = message.offset, "Worker pool closed while dispatching");
        }
    }
}

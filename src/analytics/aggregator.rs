//! Click analytics aggregation
//!
//! The write path archives each click in the event store and then applies
//! every counter mutation for that click as a single pipelined batch. The read
//! path rebuilds a windowed view from those counters.
//!
//! The two stores share no transaction. Archival is best-effort: a failed
//! insert is logged and the counters are still updated, because counter
//! freshness is what analytics consumers depend on. A failed counter batch
//! fails the whole event.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::analytics::models::{AdAnalyticsView, BucketCount, BucketSeries, RecordOutcome};
use crate::counters::keys::{dedup_key, recent_key, total_key, RECENT_TTL};
use crate::counters::{CounterCommand, CounterError, CounterKeys, CounterStore, Resolution};
use crate::models::{ClickEvent, StoredEventRecord};
use crate::storage::EventStore;

/// Placeholder impressions figure used when none is configured
pub const DEFAULT_IMPRESSIONS_BASELINE: u64 = 1000;

/// Upper bound on the buckets read by one [`AnalyticsAggregator::bucket_series`] call
pub const MAX_BUCKETS: usize = 1440;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("invalid click event: {0}")]
    InvalidEvent(String),
    #[error("failed to update counters for ad {ad_id}: {source}")]
    CounterWrite {
        ad_id: String,
        #[source]
        source: CounterError,
    },
    #[error("analytics unavailable: {0}")]
    Unavailable(#[source] CounterError),
}

pub struct AnalyticsAggregator {
    events: Arc<dyn EventStore>,
    counters: Arc<dyn CounterStore>,
    impressions_baseline: u64,
}

impl AnalyticsAggregator {
    pub fn new(events: Arc<dyn EventStore>, counters: Arc<dyn CounterStore>) -> Self {
        Self {
            events,
            counters,
            impressions_baseline: DEFAULT_IMPRESSIONS_BASELINE,
        }
    }

    pub fn with_impressions_baseline(mut self, impressions_baseline: u64) -> Self {
        self.impressions_baseline = impressions_baseline;
        self
    }

    /// Every counter mutation for one click, TTLs included, in submission order
    pub fn counter_batch(event: &ClickEvent) -> Vec<CounterCommand> {
        let keys = CounterKeys::for_event(event);
        let mut commands = Vec::with_capacity(10);

        for (key, ttl) in keys.counters() {
            commands.push(CounterCommand::Increment {
                key: key.to_string(),
            });
            commands.push(CounterCommand::Expire {
                key: key.to_string(),
                ttl,
            });
        }

        commands.push(CounterCommand::AddToOrderedSet {
            key: keys.recent.clone(),
            score: event.unix_seconds() as f64,
            member: event.recent_member(),
        });
        commands.push(CounterCommand::Expire {
            key: keys.recent,
            ttl: RECENT_TTL,
        });

        commands
    }

    /// Archive one click and update its counters.
    ///
    /// Every call increments the counters, so a redelivered event is counted
    /// again. Use [`Self::record_event_once`] when the delivery position is known.
    pub async fn record_event(&self, event: &ClickEvent) -> Result<RecordOutcome, AnalyticsError> {
        if event.ad_id.is_empty() {
            return Err(AnalyticsError::InvalidEvent("ad_id is empty".to_string()));
        }

        let record = StoredEventRecord::new(event.clone(), Utc::now());
        let event_id = match self.events.insert(&record).await {
            Ok(id) => {
                debug!(ad_id = %event.ad_id, event_id = id, "Archived click event");
                Some(id)
            }
            Err(err) => {
                warn!(ad_id = %event.ad_id, error = %err, "Failed to archive click event, updating counters anyway");
                None
            }
        };

        self.counters
            .execute_batch(Self::counter_batch(event))
            .await
            .map_err(|source| AnalyticsError::CounterWrite {
                ad_id: event.ad_id.clone(),
                source,
            })?;

        debug!(ad_id = %event.ad_id, "Updated click counters");
        Ok(RecordOutcome::Recorded { event_id })
    }

    /// Record a click at most once per delivery token.
    ///
    /// The token is claimed before anything is written. If the counter store
    /// is unavailable for the batch the claim is released so a redelivery can
    /// try again. Any other batch failure keeps the claim: the store may have
    /// applied part of the batch, and a retry would count it twice.
    pub async fn record_event_once(
        &self,
        event: &ClickEvent,
        token: &str,
        claim_ttl: Duration,
    ) -> Result<RecordOutcome, AnalyticsError> {
        let claim = dedup_key(token);
        let claimed = self
            .counters
            .set_if_absent(&claim, &event.ad_id, claim_ttl)
            .await
            .map_err(|source| AnalyticsError::CounterWrite {
                ad_id: event.ad_id.clone(),
                source,
            })?;

        if !claimed {
            debug!(ad_id = %event.ad_id, token, "Skipping already applied delivery");
            return Ok(RecordOutcome::Duplicate);
        }

        let result = self.record_event(event).await;
        match &result {
            Err(AnalyticsError::CounterWrite {
                source: CounterError::Unavailable(_),
                ..
            }) => {
                if let Err(err) = self.counters.delete(&claim).await {
                    warn!(token, error = %err, "Failed to release delivery claim");
                }
            }
            Err(AnalyticsError::CounterWrite { source, .. }) => {
                warn!(token, error = %source, "Counter batch rejected, keeping delivery claim");
            }
            _ => {}
        }
        result
    }

    /// Rebuild the analytics view for `ad_id` over the window ending now
    pub async fn query_analytics(
        &self,
        ad_id: &str,
        window: Duration,
    ) -> Result<AdAnalyticsView, AnalyticsError> {
        let computed_at = Utc::now();

        let total_clicks = self.read_counter(&total_key(ad_id)).await?;

        let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        let max = computed_at.timestamp();
        let min = max.saturating_sub(window_secs);
        let recent_clicks = self
            .counters
            .count_in_range(&recent_key(ad_id), min as f64, max as f64)
            .await
            .map_err(AnalyticsError::Unavailable)?;

        // Impressions are not tracked; the baseline is a fixed stand-in
        let ctr = if self.impressions_baseline == 0 {
            0.0
        } else {
            total_clicks as f64 / self.impressions_baseline as f64 * 100.0
        };

        Ok(AdAnalyticsView {
            ad_id: ad_id.to_string(),
            total_clicks,
            recent_clicks,
            ctr,
            window_secs: window.as_secs(),
            computed_at,
        })
    }

    /// Click counts of the `count` most recent buckets, newest first.
    ///
    /// `count` is capped at [`MAX_BUCKETS`], and the series stops early at the
    /// first bucket that falls outside the representable time range.
    pub async fn bucket_series(
        &self,
        ad_id: &str,
        resolution: Resolution,
        count: usize,
    ) -> Result<BucketSeries, AnalyticsError> {
        let now = Utc::now();
        let count = count.min(MAX_BUCKETS);
        let mut buckets = Vec::with_capacity(count);

        for offset in 0..count {
            let Some(at) = i32::try_from(offset)
                .ok()
                .and_then(|offset| resolution.step().checked_mul(offset))
                .and_then(|back| now.checked_sub_signed(back))
            else {
                break;
            };
            let clicks = self.read_counter(&resolution.key(ad_id, at)).await?;
            buckets.push(BucketCount {
                bucket: resolution.bucket(at),
                clicks,
            });
        }

        Ok(BucketSeries {
            ad_id: ad_id.to_string(),
            resolution,
            buckets,
        })
    }

    /// Integer counter value; a missing key counts as zero
    async fn read_counter(&self, key: &str) -> Result<u64, AnalyticsError> {
        match self
            .counters
            .get_string(key)
            .await
            .map_err(AnalyticsError::Unavailable)?
        {
            None => Ok(0),
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                AnalyticsError::Unavailable(CounterError::Protocol(format!(
                    "counter {key} holds non-integer value '{raw}'"
                )))
            }),
        }
    }
}

//! Data models for analytics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::counters::Resolution;

/// Windowed analytics for one ad, rebuilt from the counters on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdAnalyticsView {
    pub ad_id: String,

    /// Lifetime clicks (retained for 24h after the latest click)
    pub total_clicks: u64,

    /// Clicks whose event time falls inside the requested window
    pub recent_clicks: u64,

    /// Click-through rate in percent against the impressions baseline
    #[serde(rename = "ctr_percentage")]
    pub ctr: f64,

    /// Length of the window used for `recent_clicks`
    pub window_secs: u64,

    pub computed_at: DateTime<Utc>,
}

/// Click count of a single minute/hour/day bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketCount {
    pub bucket: String,
    pub clicks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSeries {
    pub ad_id: String,
    pub resolution: Resolution,
    /// Newest bucket first
    pub buckets: Vec<BucketCount>,
}

/// Result of recording one click
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Counters were updated
    Recorded {
        /// Identifier of the archived record, `None` when archival failed
        event_id: Option<i64>,
    },
    /// The delivery had already been applied; nothing was written
    Duplicate,
}

impl RecordOutcome {
    pub fn archived(&self) -> bool {
        matches!(self, RecordOutcome::Recorded { event_id: Some(_) })
    }
}

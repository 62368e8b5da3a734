//! Click analytics
//!
//! Counter-backed aggregation of ad click events and the windowed read path
//! built on top of it.

pub mod aggregator;
pub mod models;

pub use aggregator::{AnalyticsAggregator, AnalyticsError, MAX_BUCKETS};
pub use models::{AdAnalyticsView, BucketCount, BucketSeries, RecordOutcome};

//! Analytics API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::analytics::{AdAnalyticsView, AnalyticsError, BucketSeries, MAX_BUCKETS};
use crate::counters::Resolution;

use super::handlers::{error_response, ApiState, ErrorResponse};

#[derive(Debug, Deserialize)]
pub struct AnalyticsQueryParams {
    /// Sliding window length in seconds (default: 300)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
pub struct BucketQueryParams {
    #[serde(default = "default_resolution")]
    pub resolution: Resolution,

    /// Number of buckets (default: 60, max: 1440)
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_resolution() -> Resolution {
    Resolution::Minute
}

fn default_count() -> usize {
    60
}

fn analytics_error(ad_id: &str, err: AnalyticsError) -> (StatusCode, Json<ErrorResponse>) {
    tracing::error!(ad_id = %ad_id, error = %err, "Failed to compute analytics");
    let status = match err {
        AnalyticsError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, format!("Failed to retrieve analytics: {}", err))
}

/// Click totals and sliding-window activity for one ad
pub async fn get_ad_analytics(
    State(state): State<Arc<ApiState>>,
    Path(ad_id): Path<String>,
    Query(params): Query<AnalyticsQueryParams>,
) -> Result<Json<AdAnalyticsView>, (StatusCode, Json<ErrorResponse>)> {
    state
        .aggregator
        .query_analytics(&ad_id, Duration::from_secs(params.window_secs))
        .await
        .map(Json)
        .map_err(|err| analytics_error(&ad_id, err))
}

/// Per-bucket click counts for one ad, newest bucket first
pub async fn get_ad_buckets(
    State(state): State<Arc<ApiState>>,
    Path(ad_id): Path<String>,
    Query(params): Query<BucketQueryParams>,
) -> Result<Json<BucketSeries>, (StatusCode, Json<ErrorResponse>)> {
    let count = params.count.clamp(1, MAX_BUCKETS);

    state
        .aggregator
        .bucket_series(&ad_id, params.resolution, count)
        .await
        .map(Json)
        .map_err(|err| analytics_error(&ad_id, err))
}

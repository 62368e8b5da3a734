use axum::{routing::get, Router};
use std::sync::Arc;

use crate::context::AppContext;

use super::analytics::{get_ad_analytics, get_ad_buckets};
use super::handlers::{health_check, list_ads, ApiState};

pub fn create_api_router(ctx: Arc<AppContext>) -> Router {
    let state = Arc::new(ApiState {
        aggregator: Arc::clone(&ctx.aggregator),
        catalog: Arc::clone(&ctx.catalog),
    });

    Router::new()
        .route("/health", get(health_check))
        .route("/ads", get(list_ads))
        .route("/ads/{ad_id}/analytics", get(get_ad_analytics))
        .route("/ads/{ad_id}/buckets", get(get_ad_buckets))
        .with_state(state)
}

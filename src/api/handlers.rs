use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::analytics::AnalyticsAggregator;
use crate::catalog::AdCatalog;
use crate::models::AdListResponse;

pub struct ApiState {
    pub aggregator: Arc<AnalyticsAggregator>,
    pub catalog: Arc<AdCatalog>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

pub(super) fn error_response(status: StatusCode, error: String) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error }))
}

/// List every ad, served cache-aside
pub async fn list_ads(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<AdListResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state.catalog.list_ads().await {
        Ok(listing) => {
            let total = listing.ads.len();
            Ok(Json(AdListResponse {
                ads: listing.ads,
                total,
            }))
        }
        Err(e) => {
            tracing::error!("Failed to list ads: {}", e);
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to list ads: {}", e),
            ))
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
    })
}

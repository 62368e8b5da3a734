//! HTTP read API integration tests

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use clickpulse::api;
use clickpulse::config::*;
use clickpulse::context::AppContext;
use clickpulse::counters::InMemoryCounterStore;
use clickpulse::models::Ad;
use clickpulse::storage::EventStore;
use common::{click, create_sqlite_storage};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

fn create_test_config() -> Config {
    Config {
        kafka: KafkaConfig {
            brokers: vec!["localhost:9092".to_string()],
            topic: "ad_clicks".to_string(),
            consumer_group: "ad_clicks_group".to_string(),
            commit_interval_ms: 1000,
        },
        database: DatabaseConfig {
            backend: DatabaseBackend::Sqlite,
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
        },
        counters: CounterConfig {
            backend: CounterBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            pool_size: 4,
            command_timeout_ms: 3000,
        },
        ingest: IngestConfig::default(),
        analytics: AnalyticsConfig {
            impressions_baseline: 200,
            ads_cache_ttl_secs: 60,
        },
        api_server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
        },
    }
}

async fn create_test_app() -> (Router, Arc<AppContext>, Arc<InMemoryCounterStore>) {
    let events = create_sqlite_storage().await;
    let counters = Arc::new(InMemoryCounterStore::new());
    let ctx = Arc::new(AppContext::from_stores(
        create_test_config(),
        events,
        counters.clone(),
    ));
    (api::create_api_router(Arc::clone(&ctx)), ctx, counters)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn test_health_check() {
    let (app, _ctx, _counters) = create_test_app().await;

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn test_list_ads() {
    let (app, ctx, _counters) = create_test_app().await;
    for id in ["ad1", "ad2"] {
        ctx.events
            .upsert_ad(&Ad {
                id: id.to_string(),
                image_url: format!("https://cdn.example.com/{id}.png"),
                target_url: format!("https://example.com/{id}"),
            })
            .await
            .unwrap();
    }

    let (status, body) = get_json(&app, "/ads").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["ads"][0]["id"], "ad1");
    assert_eq!(body["ads"][1]["target_url"], "https://example.com/ad2");

    // Cached copy serves the same payload
    let (_, cached) = get_json(&app, "/ads").await;
    assert_eq!(cached, body);
}

#[tokio::test]
async fn test_ad_analytics() {
    let (app, ctx, _counters) = create_test_app().await;
    ctx.aggregator
        .record_event(&click("ad1", "1.2.3.4", Utc::now()))
        .await
        .unwrap();

    let (status, body) = get_json(&app, "/ads/ad1/analytics?window_secs=3600").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ad_id"], "ad1");
    assert_eq!(body["total_clicks"], 1);
    assert_eq!(body["recent_clicks"], 1);
    assert_eq!(body["window_secs"], 3600);
    assert_eq!(body["ctr_percentage"], 0.5);
}

#[tokio::test]
async fn test_ad_analytics_default_window() {
    let (app, _ctx, _counters) = create_test_app().await;

    let (status, body) = get_json(&app, "/ads/unknown/analytics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_clicks"], 0);
    assert_eq!(body["window_secs"], 300);
}

#[tokio::test]
async fn test_ad_analytics_unavailable() {
    let (app, _ctx, counters) = create_test_app().await;
    counters.set_unavailable(true);

    let (status, body) = get_json(&app, "/ads/ad1/analytics").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("unavailable"));
}

#[tokio::test]
async fn test_ad_buckets() {
    let (app, ctx, _counters) = create_test_app().await;
    ctx.aggregator
        .record_event(&click("ad1", "1.2.3.4", Utc::now()))
        .await
        .unwrap();

    let (status, body) = get_json(&app, "/ads/ad1/buckets?resolution=day&count=3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolution"], "day");
    let buckets = body["buckets"].as_array().unwrap();
    assert_eq!(buckets.len(), 3);
    let total: u64 = buckets.iter().map(|b| b["clicks"].as_u64().unwrap()).sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn test_ad_buckets_rejects_unknown_resolution() {
    let (app, _ctx, _counters) = create_test_app().await;

    let (status, _) = get_json(&app, "/ads/ad1/buckets?resolution=week").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

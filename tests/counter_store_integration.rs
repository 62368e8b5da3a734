//! Integration tests for the Redis counter store
//!
//! Tests that need a server run only when REDIS_URL is set. Every test works
//! on keys derived from a fresh ad id, so runs never collide.

mod common;

use chrono::Utc;
use clickpulse::analytics::AnalyticsAggregator;
use clickpulse::counters::keys::{dedup_key, recent_key, total_key, TOTAL_TTL};
use clickpulse::counters::{CounterCommand, CounterError, CounterStore, RedisCounterStore, Resolution};
use common::{click, create_sqlite_storage};
use std::sync::Arc;
use std::time::Duration;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

async fn create_redis_store() -> Option<(Arc<RedisCounterStore>, String)> {
    let url = std::env::var("REDIS_URL").ok()?;
    let store = RedisCounterStore::new(&url, 4, COMMAND_TIMEOUT).await.ok()?;
    Some((Arc::new(store), url))
}

fn unique_ad_id() -> String {
    format!("it-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

/// Remaining TTL of `key` in seconds, read over a plain client
async fn ttl_of(url: &str, key: &str) -> i64 {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    redis::cmd("TTL").arg(key).query_async(&mut conn).await.unwrap()
}

#[tokio::test]
async fn test_single_click_scenario_redis() {
    let Some((counters, url)) = create_redis_store().await else {
        return;
    };
    let ad_id = unique_ad_id();
    let aggregator = AnalyticsAggregator::new(create_sqlite_storage().await, counters.clone());

    let now = Utc::now();
    aggregator.record_event(&click(&ad_id, "1.2.3.4", now)).await.unwrap();

    let view = aggregator
        .query_analytics(&ad_id, Duration::from_secs(300))
        .await
        .unwrap();
    assert_eq!(view.total_clicks, 1);
    assert_eq!(view.recent_clicks, 1);

    let day = Resolution::Day.key(&ad_id, now);
    assert_eq!(counters.get_string(&day).await.unwrap().as_deref(), Some("1"));

    // Every key written by the batch carries its retention
    let total_ttl = ttl_of(&url, &total_key(&ad_id)).await;
    assert!(total_ttl > 0 && total_ttl <= TOTAL_TTL.as_secs() as i64, "{total_ttl}");
    let minute_ttl = ttl_of(&url, &Resolution::Minute.key(&ad_id, now)).await;
    assert!(minute_ttl > 0 && minute_ttl <= 3600, "{minute_ttl}");
    let recent_ttl = ttl_of(&url, &recent_key(&ad_id)).await;
    assert!(recent_ttl > 0 && recent_ttl <= 3600, "{recent_ttl}");

    for key in [total_key(&ad_id), recent_key(&ad_id), day] {
        counters.delete(&key).await.unwrap();
    }
}

#[tokio::test]
async fn test_claim_round_trip_redis() {
    let Some((counters, url)) = create_redis_store().await else {
        return;
    };
    let claim = dedup_key(&format!("{}:0:41", unique_ad_id()));
    let ttl = Duration::from_secs(60);

    assert!(counters.set_if_absent(&claim, "ad1", ttl).await.unwrap());
    assert!(!counters.set_if_absent(&claim, "ad1", ttl).await.unwrap());
    let claim_ttl = ttl_of(&url, &claim).await;
    assert!(claim_ttl > 0 && claim_ttl <= 60, "{claim_ttl}");

    counters.delete(&claim).await.unwrap();
    assert!(counters.set_if_absent(&claim, "ad1", ttl).await.unwrap());
    counters.delete(&claim).await.unwrap();
}

#[tokio::test]
async fn test_batch_commands_apply_redis() {
    let Some((counters, _url)) = create_redis_store().await else {
        return;
    };
    let ad_id = unique_ad_id();
    let counter = total_key(&ad_id);
    let recent = recent_key(&ad_id);
    let cached = format!("cache:{ad_id}");
    let ttl = Duration::from_secs(60);

    counters
        .execute_batch(vec![
            CounterCommand::Increment { key: counter.clone() },
            CounterCommand::Increment { key: counter.clone() },
            CounterCommand::Expire { key: counter.clone(), ttl },
            CounterCommand::AddToOrderedSet {
                key: recent.clone(),
                score: 100.0,
                member: "1.2.3.4-100".to_string(),
            },
            CounterCommand::AddToOrderedSet {
                key: recent.clone(),
                score: 200.0,
                member: "1.2.3.4-200".to_string(),
            },
            CounterCommand::SetString {
                key: cached.clone(),
                value: "[]".to_string(),
                ttl,
            },
        ])
        .await
        .unwrap();

    assert_eq!(counters.get_string(&counter).await.unwrap().as_deref(), Some("2"));
    assert_eq!(counters.count_in_range(&recent, 150.0, 250.0).await.unwrap(), 1);
    assert_eq!(counters.count_in_range(&recent, 0.0, 250.0).await.unwrap(), 2);
    assert_eq!(counters.get_string(&cached).await.unwrap().as_deref(), Some("[]"));

    for key in [counter, recent, cached] {
        counters.delete(&key).await.unwrap();
    }
}

#[tokio::test]
async fn test_rejected_batch_is_not_rolled_back_redis() {
    let Some((counters, _url)) = create_redis_store().await else {
        return;
    };
    let ad_id = unique_ad_id();
    let applied = format!("hour:{ad_id}:2024030509");
    let wrong_type = total_key(&ad_id);

    counters
        .add_to_ordered_set(&wrong_type, 1.0, "x")
        .await
        .unwrap();
    let result = counters
        .execute_batch(vec![
            CounterCommand::Increment { key: applied.clone() },
            CounterCommand::Increment { key: wrong_type.clone() },
        ])
        .await;

    assert!(matches!(result, Err(CounterError::Protocol(_))), "{result:?}");
    // MULTI/EXEC keeps the commands that succeeded
    assert_eq!(counters.get_string(&applied).await.unwrap().as_deref(), Some("1"));

    counters.delete(&applied).await.unwrap();
    counters.delete(&wrong_type).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_unavailable() {
    let result = RedisCounterStore::new("redis://127.0.0.1:1", 1, Duration::from_millis(500)).await;
    assert!(matches!(result, Err(CounterError::Unavailable(_))));
}

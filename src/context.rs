//! Shared service wiring for the binaries

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::analytics::AnalyticsAggregator;
use crate::catalog::AdCatalog;
use crate::config::{Config, CounterBackend, DatabaseBackend};
use crate::counters::{CounterStore, InMemoryCounterStore, RedisCounterStore};
use crate::storage::{EventStore, PostgresStorage, SqliteStorage};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_BACKOFF_STEP: Duration = Duration::from_secs(2);

pub struct AppContext {
    pub config: Config,
    pub events: Arc<dyn EventStore>,
    pub counters: Arc<dyn CounterStore>,
    pub aggregator: Arc<AnalyticsAggregator>,
    pub catalog: Arc<AdCatalog>,
}

impl AppContext {
    /// Connect both stores, creating the event schema if needed
    pub async fn connect(config: Config) -> Result<Self> {
        let events: Arc<dyn EventStore> = match config.database.backend {
            DatabaseBackend::Sqlite => {
                info!("Using SQLite event store: {}", config.database.url);
                let store = with_retry("sqlite", || {
                    SqliteStorage::new(&config.database.url, config.database.max_connections)
                })
                .await?;
                Arc::new(store)
            }
            DatabaseBackend::Postgres => {
                info!("Using PostgreSQL event store: {}", config.database.url);
                let store = with_retry("postgres", || {
                    PostgresStorage::new(&config.database.url, config.database.max_connections)
                })
                .await?;
                Arc::new(store)
            }
        };

        info!("Initializing event store...");
        events.init().await?;
        info!("Event store initialized successfully");

        let counters: Arc<dyn CounterStore> = match config.counters.backend {
            CounterBackend::Redis => {
                info!("Using Redis counter store: {}", config.counters.redis_url);
                let store = with_retry("redis", || async {
                    RedisCounterStore::new(
                        &config.counters.redis_url,
                        config.counters.pool_size,
                        config.counters.command_timeout(),
                    )
                    .await
                        .map_err(anyhow::Error::from)
                })
                .await?;
                Arc::new(store)
            }
            CounterBackend::Memory => {
                warn!("Using in-memory counter store; counters are lost on restart");
                Arc::new(InMemoryCounterStore::new())
            }
        };

        Ok(Self::from_stores(config, events, counters))
    }

    /// Build the services over already connected stores
    pub fn from_stores(
        config: Config,
        events: Arc<dyn EventStore>,
        counters: Arc<dyn CounterStore>,
    ) -> Self {
        let aggregator = Arc::new(
            AnalyticsAggregator::new(Arc::clone(&events), Arc::clone(&counters))
                .with_impressions_baseline(config.analytics.impressions_baseline),
        );
        let catalog = Arc::new(AdCatalog::new(
            Arc::clone(&events),
            Arc::clone(&counters),
            Duration::from_secs(config.analytics.ads_cache_ttl_secs),
        ));

        Self {
            config,
            events,
            counters,
            aggregator,
            catalog,
        }
    }
}

/// Retry a connection with a linearly growing pause between attempts
async fn with_retry<T, F, Fut>(name: &str, mut connect: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match connect().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < CONNECT_ATTEMPTS => {
                let backoff = CONNECT_BACKOFF_STEP * attempt;
                warn!(
                    store = name,
                    attempt,
                    backoff_secs = backoff.as_secs(),
                    error = %err,
                    "Store connection failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to connect to {name} after {CONNECT_ATTEMPTS} attempts"))
            }
        }
    }
}

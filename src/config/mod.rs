use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::analytics::aggregator::DEFAULT_IMPRESSIONS_BASELINE;
use crate::catalog::DEFAULT_ADS_CACHE_TTL;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub database: DatabaseConfig,
    pub counters: CounterConfig,
    pub ingest: IngestConfig,
    pub analytics: AnalyticsConfig,
    pub api_server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub consumer_group: String,
    pub commit_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    pub backend: CounterBackend,
    pub redis_url: String,
    pub pool_size: usize,
    /// Deadline for a single Redis command or batch
    pub command_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Number of concurrent processing workers
    pub workers: usize,
    /// Capacity of the queue between the puller and the workers
    pub queue_capacity: usize,
    pub queue_full_policy: QueueFullPolicy,
    pub poll_timeout_secs: u64,
    pub read_backoff_ms: u64,
    /// Upper bound on shutdown drain; `None` waits for every unit
    pub drain_timeout_secs: Option<u64>,
    pub dedup_enabled: bool,
    pub dedup_ttl_secs: u64,
}

/// What the puller does when every worker is busy and the queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueFullPolicy {
    /// Wait for space (backpressure onto the log)
    #[default]
    Block,
    /// Log and discard the event
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Placeholder impressions figure used as the CTR denominator.
    /// Impressions are not tracked yet.
    pub impressions_baseline: u64,
    pub ads_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl CounterConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.max(1))
    }
}

impl IngestConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_secs.map(Duration::from_secs)
    }

    pub fn dedup_ttl(&self) -> Option<Duration> {
        self.dedup_enabled
            .then(|| Duration::from_secs(self.dedup_ttl_secs))
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            queue_capacity: 1024,
            queue_full_policy: QueueFullPolicy::Block,
            poll_timeout_secs: 10,
            read_backoff_ms: 1000,
            drain_timeout_secs: Some(30),
            dedup_enabled: false,
            dedup_ttl_secs: 86_400,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            impressions_baseline: DEFAULT_IMPRESSIONS_BASELINE,
            ads_cache_ttl_secs: DEFAULT_ADS_CACHE_TTL.as_secs(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{value}'")),
        _ => Ok(default),
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Accepts either a full `redis://` URL or a bare `host:port` address.
fn normalize_redis_url(raw: &str) -> String {
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("redis://{raw}")
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let brokers = env_or("KAFKA_BROKER", "localhost:9092")
            .split(',')
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect::<Vec<_>>();
        if brokers.is_empty() {
            anyhow::bail!("KAFKA_BROKER must name at least one broker");
        }

        let backend = match env_or("DATABASE_BACKEND", "sqlite").to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            "sqlite" => DatabaseBackend::Sqlite,
            other => {
                tracing::warn!(
                    "Unknown DATABASE_BACKEND '{other}', falling back to 'sqlite'. Supported values: sqlite, postgres"
                );
                DatabaseBackend::Sqlite
            }
        };

        let counter_backend = match env_or("COUNTER_BACKEND", "redis").to_lowercase().as_str() {
            "redis" => CounterBackend::Redis,
            "memory" => CounterBackend::Memory,
            other => {
                tracing::warn!(
                    "Unknown COUNTER_BACKEND '{other}', falling back to 'redis'. Supported values: redis, memory"
                );
                CounterBackend::Redis
            }
        };

        let redis_url = std::env::var("REDIS_URL")
            .or_else(|_| std::env::var("REDIS_ADDR"))
            .map(|raw| normalize_redis_url(&raw))
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let queue_full_policy = match env_or("INGEST_QUEUE_FULL_POLICY", "block")
            .to_lowercase()
            .as_str()
        {
            "block" => QueueFullPolicy::Block,
            "drop" => QueueFullPolicy::Drop,
            other => {
                tracing::warn!(
                    "Unknown INGEST_QUEUE_FULL_POLICY '{other}', falling back to 'block'. Supported values: block, drop"
                );
                QueueFullPolicy::Block
            }
        };

        let defaults = IngestConfig::default();
        let workers = env_parse("INGEST_WORKERS", defaults.workers)?;
        if workers == 0 {
            anyhow::bail!("INGEST_WORKERS must be at least 1");
        }
        let drain_timeout_secs = match env_parse("INGEST_DRAIN_TIMEOUT_SECS", 30u64)? {
            0 => None,
            secs => Some(secs),
        };

        let analytics_defaults = AnalyticsConfig::default();

        Ok(Config {
            kafka: KafkaConfig {
                brokers,
                topic: env_or("KAFKA_TOPIC", "ad_clicks"),
                consumer_group: env_or("CONSUMER_GROUP", "ad_clicks_group"),
                commit_interval_ms: env_parse("KAFKA_COMMIT_INTERVAL_MS", 1000)?,
            },
            database: DatabaseConfig {
                backend,
                url: env_or("DATABASE_URL", "sqlite://./clickpulse.db?mode=rwc"),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
            },
            counters: CounterConfig {
                backend: counter_backend,
                redis_url,
                pool_size: env_parse("REDIS_POOL_SIZE", 10)?,
                command_timeout_ms: env_parse("REDIS_COMMAND_TIMEOUT_MS", 3000)?,
            },
            ingest: IngestConfig {
                workers,
                queue_capacity: env_parse("INGEST_QUEUE_CAPACITY", defaults.queue_capacity)?.max(1),
                queue_full_policy,
                poll_timeout_secs: env_parse("INGEST_POLL_TIMEOUT_SECS", defaults.poll_timeout_secs)?,
                read_backoff_ms: env_parse("INGEST_READ_BACKOFF_MS", defaults.read_backoff_ms)?,
                drain_timeout_secs,
                dedup_enabled: env_flag("INGEST_DEDUP_ENABLED"),
                dedup_ttl_secs: env_parse("INGEST_DEDUP_TTL_SECS", defaults.dedup_ttl_secs)?,
            },
            analytics: AnalyticsConfig {
                impressions_baseline: env_parse(
                    "IMPRESSIONS_BASELINE",
                    analytics_defaults.impressions_baseline,
                )?,
                ads_cache_ttl_secs: env_parse(
                    "ADS_CACHE_TTL_SECS",
                    analytics_defaults.ads_cache_ttl_secs,
                )?,
            },
            api_server: ServerConfig {
                host: env_or("API_HOST", "127.0.0.1"),
                port: env_parse("API_PORT", 8080)?,
            },
        })
    }
}

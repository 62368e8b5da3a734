use async_trait::async_trait;
use deadpool_redis::{Config as PoolSettings, Connection, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::trait_def::{CounterCommand, CounterError, CounterResult, CounterStore};

/// Redis-backed counter store over a deadpool connection pool
///
/// Every call, pool checkout included, is bounded by `command_timeout`; a
/// call that runs past it fails as [`CounterError::Unavailable`].
pub struct RedisCounterStore {
    pool: Pool,
    command_timeout: Duration,
}

impl RedisCounterStore {
    pub async fn new(redis_url: &str, pool_size: usize, command_timeout: Duration) -> CounterResult<Self> {
        info!("Connecting to Redis counter store at {}", redis_url);

        let mut settings = PoolSettings::from_url(redis_url);
        let mut pool_config = PoolConfig::new(pool_size.max(1));
        pool_config.timeouts.wait = Some(Duration::from_secs(4));
        pool_config.timeouts.create = Some(Duration::from_secs(5));
        pool_config.timeouts.recycle = Some(Duration::from_secs(3));
        settings.pool = Some(pool_config);

        let pool = settings
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CounterError::Unavailable(format!("failed to create Redis pool: {e}")))?;

        let store = Self {
            pool,
            command_timeout,
        };
        store.ping().await?;
        Ok(store)
    }

    pub async fn ping(&self) -> CounterResult<()> {
        self.bounded("PING", async {
            let mut conn = self.connection().await?;
            let reply: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            if reply != "PONG" {
                return Err(CounterError::Protocol(format!(
                    "unexpected PING reply '{reply}'"
                )));
            }
            Ok(())
        })
        .await
    }

    async fn connection(&self) -> CounterResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CounterError::Unavailable(format!("failed to get Redis connection: {e}")))
    }

    async fn bounded<T>(
        &self,
        op: &str,
        call: impl Future<Output = CounterResult<T>>,
    ) -> CounterResult<T> {
        with_deadline(self.command_timeout, op, call).await
    }
}

async fn with_deadline<T>(
    deadline: Duration,
    op: &str,
    call: impl Future<Output = CounterResult<T>>,
) -> CounterResult<T> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            warn!(op, timeout_ms = deadline.as_millis() as u64, "Redis call timed out");
            Err(CounterError::Unavailable(format!(
                "{op} timed out after {}ms",
                deadline.as_millis()
            )))
        }
    }
}

/// Redis rejects `EX 0`, so sub-second TTLs round up to one second
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn map_redis_error(err: redis::RedisError) -> CounterError {
    if err.is_io_error()
        || err.is_timeout()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
    {
        CounterError::Unavailable(err.to_string())
    } else {
        CounterError::Protocol(err.to_string())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str) -> CounterResult<i64> {
        self.bounded("INCR", async {
            let mut conn = self.connection().await?;
            let count: i64 = conn.incr(key, 1).await.map_err(map_redis_error)?;
            Ok(count)
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CounterResult<()> {
        self.bounded("EXPIRE", async {
            let mut conn = self.connection().await?;
            let _: i64 = redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs(ttl))
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            Ok(())
        })
        .await
    }

    async fn add_to_ordered_set(&self, key: &str, score: f64, member: &str) -> CounterResult<()> {
        self.bounded("ZADD", async {
            let mut conn = self.connection().await?;
            let _: i64 = conn
                .zadd(key, member, score)
                .await
                .map_err(map_redis_error)?;
            Ok(())
        })
        .await
    }

    async fn count_in_range(&self, key: &str, min: f64, max: f64) -> CounterResult<u64> {
        self.bounded("ZCOUNT", async {
            let mut conn = self.connection().await?;
            let count: u64 = conn.zcount(key, min, max).await.map_err(map_redis_error)?;
            Ok(count)
        })
        .await
    }

    async fn get_string(&self, key: &str) -> CounterResult<Option<String>> {
        self.bounded("GET", async {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn.get(key).await.map_err(map_redis_error)?;
            Ok(value)
        })
        .await
    }

    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<()> {
        self.bounded("SET", async {
            let mut conn = self.connection().await?;
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            Ok(())
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> CounterResult<bool> {
        self.bounded("SET NX", async {
            let mut conn = self.connection().await?;
            // SET NX replies OK when written and nil when the key already exists
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs(ttl))
                .query_async(&mut conn)
                .await
                .map_err(map_redis_error)?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn delete(&self, key: &str) -> CounterResult<()> {
        self.bounded("DEL", async {
            let mut conn = self.connection().await?;
            let _: i64 = conn.del(key).await.map_err(map_redis_error)?;
            Ok(())
        })
        .await
    }

    /// Runs the batch as one MULTI/EXEC transaction.
    ///
    /// Other clients never observe a partial batch, but Redis does not roll
    /// back: if one queued command fails at execution time (WRONGTYPE, say)
    /// the others still apply and the call returns [`CounterError::Protocol`].
    /// A timed out batch may also have been applied.
    async fn execute_batch(&self, commands: Vec<CounterCommand>) -> CounterResult<()> {
        if commands.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &commands {
            match command {
                CounterCommand::Increment { key } => {
                    pipe.cmd("INCR").arg(key).ignore();
                }
                CounterCommand::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(*ttl)).ignore();
                }
                CounterCommand::AddToOrderedSet { key, score, member } => {
                    pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
                }
                CounterCommand::SetString { key, value, ttl } => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("EX")
                        .arg(ttl_secs(*ttl))
                        .ignore();
                }
            }
        }

        self.bounded("MULTI/EXEC", async {
            let mut conn = self.connection().await?;
            let _: () = pipe.query_async(&mut conn).await.map_err(map_redis_error)?;
            Ok(())
        })
        .await?;
        debug!(commands = commands.len(), "Executed counter batch");
        Ok(())
    }
}

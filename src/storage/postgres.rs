use crate::models::{Ad, StoredEventRecord};
use crate::storage::trait_def::{encode_timestamp, rows_to_records, EventRow};
use crate::storage::{EventStore, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

const SELECT_EVENTS: &str = r#"
    SELECT id, ad_id, timestamp, ip, playback_seconds, user_agent, processed_at
    FROM click_events
"#;

#[async_trait]
impl EventStore for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id BIGSERIAL PRIMARY KEY,
                ad_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                ip TEXT NOT NULL,
                playback_seconds BIGINT NOT NULL CHECK (playback_seconds >= 0),
                user_agent TEXT,
                processed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_click_events_ad_time ON click_events(ad_id, timestamp DESC)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_click_events_time ON click_events(timestamp DESC)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ads (
                id TEXT PRIMARY KEY,
                image_url TEXT NOT NULL,
                target_url TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert(&self, record: &StoredEventRecord) -> StorageResult<i64> {
        let event = &record.event;
        if event.ad_id.is_empty() {
            return Err(StorageError::WriteRejected("ad_id must not be empty".to_string()));
        }

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO click_events (ad_id, timestamp, ip, playback_seconds, user_agent, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(&event.ad_id)
        .bind(encode_timestamp(&event.timestamp))
        .bind(&event.ip)
        .bind(i64::from(event.playback_seconds))
        .bind(event.user_agent.as_deref())
        .bind(encode_timestamp(&record.processed_at))
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(id)
    }

    async fn query_all(&self) -> StorageResult<Vec<StoredEventRecord>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!("{SELECT_EVENTS} ORDER BY id ASC"))
            .fetch_all(self.pool.as_ref())
            .await?;

        rows_to_records(rows)
    }

    async fn events_for_ad(&self, ad_id: &str, limit: i64) -> StorageResult<Vec<StoredEventRecord>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "{SELECT_EVENTS} WHERE ad_id = $1 ORDER BY timestamp DESC, id DESC LIMIT $2"
        ))
        .bind(ad_id)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows_to_records(rows)
    }

    async fn list_ads(&self) -> StorageResult<Vec<Ad>> {
        let ads = sqlx::query_as::<_, Ad>("SELECT id, image_url, target_url FROM ads ORDER BY id")
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(ads)
    }

    async fn upsert_ad(&self, ad: &Ad) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO ads (id, image_url, target_url)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET
                image_url = EXCLUDED.image_url,
                target_url = EXCLUDED.target_url
            "#,
        )
        .bind(&ad.id)
        .bind(&ad.image_url)
        .bind(&ad.target_url)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }
}

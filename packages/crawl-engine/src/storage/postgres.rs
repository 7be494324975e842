//! PostgreSQL storage: one `crawled_data` row per URL.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use std::collections::BTreeMap;

use crate::error::StorageResult;
use crate::traits::storage::{CrawledRecord, Storage};
use crate::types::job::JobId;
use crate::types::url::CrawlUrl;

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Wrap `pool`, creating the table if needed.
    pub async fn new(pool: PgPool) -> StorageResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crawled_data (
                url_id TEXT PRIMARY KEY,
                job_id UUID NOT NULL,
                product_code TEXT NOT NULL,
                data JSONB NOT NULL,
                stored_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_crawled_data_job ON crawled_data(job_id)")
            .execute(&pool)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn append(&self, url: &CrawlUrl, data: &Value) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO crawled_data (url_id, job_id, product_code, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (url_id) DO UPDATE
            SET data = EXCLUDED.data, stored_at = NOW()
            "#,
        )
        .bind(url.url_id())
        .bind(url.job_id().as_uuid())
        .bind(url.product_code())
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn crawled_data(&self, job_id: &JobId) -> StorageResult<Vec<CrawledRecord>> {
        let rows: Vec<(String, Value)> = sqlx::query_as(
            "SELECT product_code, data FROM crawled_data WHERE job_id = $1 ORDER BY product_code",
        )
        .bind(job_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(code, data)| BTreeMap::from([(code, data)]))
            .collect())
    }
}

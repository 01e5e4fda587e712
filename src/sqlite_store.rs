//! SQLite-backed [`RecordStore`] implementation.
//!
//! Maps each [`RecordStore`] operation onto the `canonical_records` table
//! created by [`crate::migrate`].

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docmerge_core::models::CanonicalRecord;
use docmerge_core::store::RecordStore;

/// SQLite implementation of the [`RecordStore`] trait.
///
/// Each upsert is a single `INSERT ... ON CONFLICT(url) DO UPDATE`
/// statement, so a record is never half-written.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_record(row: &SqliteRow) -> CanonicalRecord {
    CanonicalRecord {
        url: row.get("url"),
        pub_date: row.get("pub_date"),
        first_fetch_time: row.get("first_fetch_time"),
        fetch_time: row.get("fetch_time"),
        text: row.get("text"),
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn get(&self, url: &str) -> Result<Option<CanonicalRecord>> {
        let row = sqlx::query(
            "SELECT url, pub_date, first_fetch_time, fetch_time, text FROM canonical_records WHERE url = ?",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    async fn upsert(&self, record: &CanonicalRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO canonical_records (url, pub_date, first_fetch_time, fetch_time, text, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                pub_date = excluded.pub_date,
                first_fetch_time = excluded.first_fetch_time,
                fetch_time = excluded.fetch_time,
                text = excluded.text,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.url)
        .bind(record.pub_date)
        .bind(record.first_fetch_time)
        .bind(record.fetch_time)
        .bind(&record.text)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self, limit: i64) -> Result<Vec<CanonicalRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT url, pub_date, first_fetch_time, fetch_time, text
            FROM canonical_records
            ORDER BY url ASC
            LIMIT ?
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn count(&self) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM canonical_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

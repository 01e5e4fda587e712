use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an existing pool. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per URL; the primary key is the uniqueness constraint.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS canonical_records (
            url TEXT PRIMARY KEY,
            pub_date INTEGER NOT NULL,
            first_fetch_time INTEGER NOT NULL,
            fetch_time INTEGER NOT NULL,
            text TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (first_fetch_time <= fetch_time)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_canonical_records_fetch_time ON canonical_records(fetch_time DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

//! Database statistics.
//!
//! A quick summary of what has been reconciled: record count, observed
//! fetch-time range, last write, and database size. Used by
//! `docmerge stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub records: i64,
    /// Records whose window spans more than one fetch.
    pub multi_fetch: i64,
    pub min_first_fetch_time: Option<i64>,
    pub max_fetch_time: Option<i64>,
    pub last_write: Option<i64>,
}

pub async fn collect(pool: &SqlitePool) -> Result<Stats> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS records,
            COALESCE(SUM(CASE WHEN first_fetch_time < fetch_time THEN 1 ELSE 0 END), 0) AS multi_fetch,
            MIN(first_fetch_time) AS min_first,
            MAX(fetch_time) AS max_fetch,
            MAX(updated_at) AS last_write
        FROM canonical_records
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(Stats {
        records: row.get("records"),
        multi_fetch: row.get("multi_fetch"),
        min_first_fetch_time: row.get("min_first"),
        max_fetch_time: row.get("max_fetch"),
        last_write: row.get("last_write"),
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docmerge: Database Stats");
    println!("=========================");
    println!();
    println!("  Database:     {}", config.db.path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!();
    println!("  Records:      {}", stats.records);
    println!("  Multi-fetch:  {}", stats.multi_fetch);
    match (stats.min_first_fetch_time, stats.max_fetch_time) {
        (Some(lo), Some(hi)) => println!("  Fetch range:  {} .. {}", lo, hi),
        _ => println!("  Fetch range:  (empty)"),
    }
    println!(
        "  Last write:   {}",
        stats
            .last_write
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!();

    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

//! Canonical record retrieval.
//!
//! Backs the `docmerge get` and `docmerge list` commands. Reads go through
//! [`RecordStore`] and never take a URL's section.

use anyhow::{bail, Result};

use docmerge_core::models::CanonicalRecord;
use docmerge_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

/// Look up the canonical record for `url`.
pub async fn get_record(config: &Config, url: &str) -> Result<Option<CanonicalRecord>> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let record = store.get(url).await?;
    pool.close().await;
    Ok(record)
}

/// CLI entry point: print one record to stdout.
pub async fn run_get(config: &Config, url: &str, json: bool) -> Result<()> {
    let Some(record) = get_record(config, url).await? else {
        bail!("no canonical record for url: {}", url);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("--- Record ---");
    println!("url:              {}", record.url);
    println!("pub_date:         {}", record.pub_date);
    println!("first_fetch_time: {}", record.first_fetch_time);
    println!("fetch_time:       {}", record.fetch_time);
    println!();
    println!("--- Text ---");
    println!("{}", record.text);

    Ok(())
}

/// CLI entry point: print up to `limit` records ordered by URL.
pub async fn run_list(config: &Config, limit: i64, json: bool) -> Result<()> {
    if limit < 1 {
        bail!("--limit must be >= 1");
    }
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let records = store.list(limit).await?;
    pool.close().await;

    if json {
        for record in &records {
            println!("{}", serde_json::to_string(record)?);
        }
        return Ok(());
    }

    println!(
        "{:<60} {:>14} {:>14} {:>14}",
        "URL", "PUB_DATE", "FIRST_FETCH", "LAST_FETCH"
    );
    for r in &records {
        println!(
            "{:<60} {:>14} {:>14} {:>14}",
            truncate(&r.url, 60),
            r.pub_date,
            r.first_fetch_time,
            r.fetch_time
        );
    }
    println!("({} shown)", records.len());

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

//! In-memory [`RecordStore`] implementation for testing and embedding.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Every read hands out a
//! clone, so two callers never share the same in-memory record.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::CanonicalRecord;

use super::RecordStore;

/// In-memory store keyed by URL.
pub struct InMemoryStore {
    records: RwLock<HashMap<String, CanonicalRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get(&self, url: &str) -> Result<Option<CanonicalRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("record map lock poisoned"))?;
        Ok(records.get(url).cloned())
    }

    async fn upsert(&self, record: &CanonicalRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("record map lock poisoned"))?;
        records.insert(record.url.clone(), record.clone());
        Ok(())
    }

    async fn list(&self, limit: i64) -> Result<Vec<CanonicalRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("record map lock poisoned"))?;
        let mut all: Vec<CanonicalRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.url.cmp(&b.url));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    async fn count(&self) -> Result<i64> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("record map lock poisoned"))?;
        Ok(records.len() as i64)
    }
}

//! Storage abstraction for canonical records.
//!
//! The [`RecordStore`] trait is the whole persistence boundary the
//! reconcile engine depends on. Backends (SQLite, in-memory) live behind
//! it and must be `Send + Sync` to be shared across async tasks.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CanonicalRecord;

/// Keyed storage for one [`CanonicalRecord`] per URL.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](RecordStore::get) | Look up the record for a URL; `None` is not an error |
/// | [`upsert`](RecordStore::upsert) | Insert or overwrite the record keyed by its URL |
/// | [`list`](RecordStore::list) | Read-only listing ordered by URL |
/// | [`count`](RecordStore::count) | Number of stored records |
///
/// Upserts for different URLs must not produce partial records. Stores are
/// not required to serialize upserts for the same URL; that is the job of
/// the per-URL guard in front of the engine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Retrieve the record for `url`, if any.
    async fn get(&self, url: &str) -> Result<Option<CanonicalRecord>>;

    /// Insert `record`, or overwrite the existing record with the same URL.
    async fn upsert(&self, record: &CanonicalRecord) -> Result<()>;

    /// Up to `limit` records ordered by URL.
    async fn list(&self, limit: i64) -> Result<Vec<CanonicalRecord>>;

    async fn count(&self) -> Result<i64>;
}

//! The reconcile engine.
//!
//! [`Reconciler::reconcile`] folds one [`Snapshot`] into the stored
//! [`CanonicalRecord`] for its URL:
//!
//! ```text
//! validate → guard.lock(url) → store.get(url) → merge → store.upsert → release
//! ```
//!
//! Every successful call performs exactly one read and one write, both
//! inside the URL's section, so concurrent snapshots for one URL cannot
//! lose each other's updates. Failures are returned untouched; nothing is
//! retried here because the inbound stream already redelivers.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use docmerge_core::merge::{merge, MergeOutcome};
use docmerge_core::models::{CanonicalRecord, Snapshot};
use docmerge_core::store::RecordStore;
use docmerge_core::ReconcileError;

use crate::guard::KeyedGuard;

/// The record written by a reconcile and what changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciled {
    pub record: CanonicalRecord,
    pub outcome: MergeOutcome,
}

/// Reconcile engine over a shared [`RecordStore`].
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    guard: KeyedGuard,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            guard: KeyedGuard::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn guard(&self) -> &KeyedGuard {
        &self.guard
    }

    /// Fold `snapshot` into the canonical record for its URL.
    #[instrument(level = "debug", skip_all, fields(url = %snapshot.url, fetch_time = snapshot.fetch_time))]
    pub async fn reconcile(&self, snapshot: Snapshot) -> Result<Reconciled, ReconcileError> {
        validate(&snapshot)?;

        let _section = self.guard.lock(&snapshot.url).await?;

        let existing = self
            .store
            .get(&snapshot.url)
            .await
            .map_err(|e| ReconcileError::read(&snapshot.url, e))?;

        let merged = merge(existing, &snapshot);

        self.store
            .upsert(&merged.record)
            .await
            .map_err(|e| ReconcileError::write(&snapshot.url, e))?;

        debug!(
            outcome = ?merged.outcome,
            first_fetch_time = merged.record.first_fetch_time,
            last_fetch_time = merged.record.fetch_time,
            "reconciled"
        );

        Ok(Reconciled {
            record: merged.record,
            outcome: merged.outcome,
        })
    }

    /// Stop accepting new reconciles. In-flight calls that already hold
    /// their section finish normally.
    pub fn shutdown(&self) {
        self.guard.close();
    }
}

/// Reject snapshots that can never be reconciled.
pub fn validate(snapshot: &Snapshot) -> Result<(), ReconcileError> {
    if snapshot.url.is_empty() {
        return Err(ReconcileError::InvalidInput(
            "url must not be empty".to_string(),
        ));
    }
    Ok(())
}

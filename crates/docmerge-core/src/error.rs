//! Error taxonomy for a single reconcile.
//!
//! Store implementations return `anyhow::Result`; the engine wraps those
//! failures in [`ReconcileError::Storage`] tagged with the operation and
//! URL, and never retries.

use std::fmt;

use thiserror::Error;

/// Which store call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Read,
    Write,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOp::Read => f.write_str("read"),
            StoreOp::Write => f.write_str("write"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The snapshot cannot be reconciled at all (empty URL). Never retried.
    #[error("invalid snapshot: {0}")]
    InvalidInput(String),

    /// A store `get` or `upsert` failed. No partial write happened.
    #[error("storage {op} failed for {url}: {source}")]
    Storage {
        op: StoreOp,
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// The per-URL guard could not hand out a section (it was closed).
    #[error("concurrency guard unavailable: {0}")]
    Guard(String),
}

impl ReconcileError {
    pub fn read(url: &str, source: anyhow::Error) -> Self {
        ReconcileError::Storage {
            op: StoreOp::Read,
            url: url.to_string(),
            source,
        }
    }

    pub fn write(url: &str, source: anyhow::Error) -> Self {
        ReconcileError::Storage {
            op: StoreOp::Write,
            url: url.to_string(),
            source,
        }
    }

    /// Whether redelivering the same snapshot could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Storage { .. })
    }
}

//! # docmerge core
//!
//! Shared, runtime-free logic for docmerge: the snapshot and canonical
//! record models, the earliest/latest merge rule, the reconcile error
//! taxonomy, and the record store abstraction.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! runtime-bound dependencies. Concurrency control and concrete storage
//! live in the `docmerge` crate.

pub mod error;
pub mod merge;
pub mod models;
pub mod store;

pub use error::{ReconcileError, StoreOp};
pub use merge::{merge, Merge, MergeOutcome};
pub use models::{CanonicalRecord, Snapshot};
pub use store::RecordStore;

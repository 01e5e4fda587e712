//! # docmerge
//!
//! **Reconciles out-of-order crawl snapshots into one canonical record per URL.**
//!
//! The same document is fetched many times. Each fetch arrives as a
//! [`Snapshot`](docmerge_core::Snapshot) on an inbound stream, in no
//! particular order and possibly more than once. docmerge folds them into a
//! single [`CanonicalRecord`](docmerge_core::CanonicalRecord) per URL that
//! keeps the earliest fetch's `pub_date` and the latest fetch's `text`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ JSONL / HTTP│──▶│ guard ▸ get ▸ merge ▸ put │──▶│  SQLite   │
//! │  snapshots  │   │       (Reconciler)        │   │ records  │
//! └─────────────┘   └────────────┬─────────────┘   └──────────┘
//!                                ▼
//!                         ┌────────────┐
//!                         │ Publisher  │ (optional outbound JSONL)
//!                         └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`guard`] | Per-URL exclusive sections |
//! | [`reconcile`] | The reconcile engine |
//! | [`sqlite_store`] | SQLite-backed record store |
//! | [`ingest`] | JSONL stream ingestion with bounded concurrency |
//! | [`publish`] | Outbound stream of reconciled records |
//! | [`progress`] | Ingest progress on stderr |
//! | [`server`] | HTTP API (Axum) |
//! | [`get`] | Record lookup and listing |
//! | [`stats`] | Database statistics |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Schema creation (idempotent) |

pub mod config;
pub mod db;
pub mod get;
pub mod guard;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod publish;
pub mod reconcile;
pub mod server;
pub mod sqlite_store;
pub mod stats;

pub use docmerge_core::{models, store};
pub use docmerge_core::{CanonicalRecord, MergeOutcome, ReconcileError, Snapshot};
pub use reconcile::{Reconciled, Reconciler};

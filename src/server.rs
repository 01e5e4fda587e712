//! HTTP server.
//!
//! Exposes the reconcile engine over a small JSON API so producers that
//! cannot write to the inbound stream can push snapshots directly.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/v1/snapshots` | Reconcile one snapshot, returns `{ record, outcome }` |
//! | `GET`  | `/v1/records?url=...` | Current canonical record for a URL |
//! | `GET`  | `/health` | Health check (status and version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid snapshot: url must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `storage_unavailable` (503), `shutting_down` (503), `internal` (500).

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use docmerge_core::models::{CanonicalRecord, Snapshot};
use docmerge_core::ReconcileError;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::publish::{self, Publisher};
use crate::reconcile::{Reconciled, Reconciler};
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Reconciler,
    pub publisher: Arc<dyn Publisher>,
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let state = AppState {
        reconciler: Reconciler::new(Arc::new(SqliteStore::new(pool.clone()))),
        publisher: Arc::from(publish::from_config(config).await?),
    };
    let reconciler = state.reconciler.clone();

    let app = router(state);

    info!(bind = %config.server.bind, "docmerge server listening");
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            reconciler.shutdown();
        })
        .await?;

    pool.close().await;
    Ok(())
}

/// Build the router. Exposed for in-process testing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/snapshots", post(handle_reconcile))
        .route("/v1/records", get(handle_get_record))
        .route("/health", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        let (status, code) = match &err {
            ReconcileError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ReconcileError::Storage { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
            ReconcileError::Guard(_) => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

// ============ Handlers ============

async fn handle_reconcile(
    State(state): State<AppState>,
    Json(snapshot): Json<Snapshot>,
) -> Result<Json<Reconciled>, AppError> {
    let reconciled = state.reconciler.reconcile(snapshot).await?;

    if let Err(e) = state.publisher.publish(&reconciled.record).await {
        warn!(url = %reconciled.record.url, error = %e, "publish failed");
    }

    Ok(Json(reconciled))
}

#[derive(Deserialize)]
struct RecordQuery {
    url: String,
}

async fn handle_get_record(
    State(state): State<AppState>,
    Query(query): Query<RecordQuery>,
) -> Result<Json<CanonicalRecord>, AppError> {
    let record = state
        .reconciler
        .store()
        .get(&query.url)
        .await
        .map_err(|e| internal(e.to_string()))?;

    match record {
        Some(r) => Ok(Json(r)),
        None => Err(AppError {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: format!("no canonical record for url: {}", query.url),
        }),
    }
}

async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = if state.reconciler.guard().is_closed() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

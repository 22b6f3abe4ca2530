//! HTTP admin endpoints for the sync queue.

use crate::admin::SyncAdmin;
use crate::error::SyncError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Query string of the history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    /// Maximum entries; unparseable values fall back to the default.
    pub limit: Option<String>,
}

/// Admin API state.
#[derive(Clone)]
pub struct SyncApi {
    admin: SyncAdmin,
}

impl SyncApi {
    /// Serve `admin` over HTTP.
    pub fn new(admin: SyncAdmin) -> Self {
        Self { admin }
    }

    /// Build the router.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/api/sync/status", get(status_handler))
            .route("/api/sync/history", get(history_handler))
            .route("/api/sync/retry/:task_id", post(retry_handler))
            .with_state(self)
    }

    /// Listen on `addr` until `shutdown` resolves.
    pub async fn serve(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = Arc::new(self).router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Sync admin API listening on {}", addr);

        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn internal_error(context: &str, err: SyncError) -> Response {
    tracing::error!("Error {}: {}", context, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Internal server error" })),
    )
        .into_response()
}

async fn status_handler(State(api): State<Arc<SyncApi>>) -> Response {
    match api.admin.status().await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => internal_error("getting sync status", e),
    }
}

async fn history_handler(
    State(api): State<Arc<SyncApi>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.and_then(|l| l.trim().parse::<usize>().ok());
    match api.admin.history(limit).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => internal_error("getting sync history", e),
    }
}

async fn retry_handler(
    State(api): State<Arc<SyncApi>>,
    Path(task_id): Path<String>,
) -> Response {
    match api.admin.retry(&task_id).await {
        Ok(new_id) => {
            tracing::info!("Retry of {} started as {}", task_id, new_id);
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "message": "Task retry initiated",
                    "taskId": task_id,
                })),
            )
                .into_response()
        }
        Err(e @ SyncError::TaskNotFound { .. }) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": e.to_string(), "taskId": task_id })),
        )
            .into_response(),
        Err(e @ SyncError::Disabled) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => internal_error("retrying sync task", e),
    }
}

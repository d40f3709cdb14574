//! Read-only HTTP status endpoint.
//!
//! A thin axum shim over the orchestrator: it only ever reads registry
//! snapshots, so it can neither block nor corrupt job execution.

use crate::orchestrator::JobOrchestrator;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Error type for the status server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// The server loop failed.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Build the status router over an orchestrator.
pub fn status_router(orchestrator: JobOrchestrator) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id", get(get_job))
        .with_state(orchestrator)
}

/// Serve the status endpoints until the shutdown token fires.
pub async fn run_status_server(
    orchestrator: JobOrchestrator,
    bind_addr: &str,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;
    info!(addr = %bind_addr, "status server listening");

    let router = status_router(orchestrator);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// `GET /jobs` — status reports for every known job.
async fn list_jobs(State(orchestrator): State<JobOrchestrator>) -> impl IntoResponse {
    Json(orchestrator.list_status().await)
}

/// `GET /jobs/:id` — one status report, or a JSON 404.
async fn get_job(
    State(orchestrator): State<JobOrchestrator>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match orchestrator.get_status(&id).await {
        Ok(report) => (StatusCode::OK, Json(json!(report))),
        Err(_) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("job not found: {}", id) })),
        ),
    }
}

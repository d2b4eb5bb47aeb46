//! Axum HTTP routes for the courier API.

use crate::error::{Result, ServerError};
use crate::server::{gateway, AppState};
use axum::extract::{Form, Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

// ─── Route builder ───────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(liveness))
        .route("/send", post(send))
        .route("/list", get(list))
        .route("/cancel/:owner/:job_id", get(cancel))
        .route("/progress/:owner/:job_id", get(progress))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Handlers ────────────────────────────────────────────────────

async fn liveness() -> impl IntoResponse {
    "OK"
}

async fn send(
    State(state): State<Arc<AppState>>,
    Form(req): Form<gateway::SendRequest>,
) -> std::result::Result<impl IntoResponse, ServerError> {
    let queued = gateway::enqueue_batch(&state, &req)?;
    Ok(Json(serde_json::json!({ "queued": queued })))
}

async fn list(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(gateway::pending_shared(&state))
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path((owner, job_id)): Path<(String, u64)>,
) -> impl IntoResponse {
    let canceled = gateway::cancel_job(&state, &owner, job_id);
    Json(serde_json::json!({ "canceled": canceled }))
}

async fn progress(
    State(state): State<Arc<AppState>>,
    Path((owner, job_id)): Path<(String, u64)>,
) -> std::result::Result<impl IntoResponse, ServerError> {
    let report = gateway::job_progress(&state, &owner, job_id)?;
    Ok(Json(report))
}

// ─── Server startup ──────────────────────────────────────────────

/// Bind and serve the courier API until ctrl-c.
pub async fn serve(state: Arc<AppState>, bind: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind, port).parse().map_err(|e| {
        crate::error::ConfigError::InvalidBindAddr {
            addr: format!("{}:{}", bind, port),
            reason: format!("{}", e),
        }
    })?;

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Courier API listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    // Failing to install the handler would leave no way to stop cleanly
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("Failed to install CTRL+C handler");
    }
    info!("Shutting down gracefully...");
}

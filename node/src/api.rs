//! HTTP API for a baton node

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::runtime::{NodeRuntime, NodeStatus};

/// API state containing node runtime
pub type ApiState = Arc<NodeRuntime>;

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

/// Acknowledgement of a queued baton command
#[derive(Serialize)]
pub struct CommandResponse {
    pub baton: String,
    pub command: String,
}

/// Create API router
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/claim", post(claim))
        .route("/release", post(release))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Node and baton status
async fn status(State(runtime): State<ApiState>) -> impl IntoResponse {
    match runtime.status().await {
        Ok(status) => (StatusCode::OK, Json(ApiResponse::ok(status))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiResponse::<NodeStatus>::err(e)),
        ),
    }
}

/// Claim the baton. Elections are asynchronous; poll `/status` for the outcome.
async fn claim(State(runtime): State<ApiState>) -> impl IntoResponse {
    runtime.claim();
    (StatusCode::ACCEPTED, Json(ApiResponse::ok(command(&runtime, "claim"))))
}

/// Release the baton if this node holds it
async fn release(State(runtime): State<ApiState>) -> impl IntoResponse {
    runtime.release();
    (StatusCode::ACCEPTED, Json(ApiResponse::ok(command(&runtime, "release"))))
}

fn command(runtime: &NodeRuntime, command: &str) -> CommandResponse {
    CommandResponse {
        baton: runtime.baton().name().to_string(),
        command: command.to_string(),
    }
}

/// Start API server
pub async fn start_api_server(runtime: Arc<NodeRuntime>, listen_addr: &str) -> anyhow::Result<()> {
    let router = create_router(runtime);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("API server listening on {}", listen_addr);

    axum::serve(listener, router).await?;

    Ok(())
}

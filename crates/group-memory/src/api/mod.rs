//! API module - HTTP surface for ingestion, context assembly and administration

pub mod admin_api;
pub mod memory_api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::MemorySystem;

const MAX_ID_LEN: usize = 256;
const MAX_TEXT_BYTES: usize = 65_536;

#[derive(Clone)]
pub struct AppState {
    pub memory: Arc<MemorySystem>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (
            self.status,
            Json(json!({
                "error": self.message,
                "code": self.status.as_u16(),
            })),
        )
            .into_response()
    }
}

/// Conversation and author ids: non-empty, bounded, printable
pub(crate) fn validate_id(kind: &str, id: &str) -> Result<(), ApiError> {
    if id.is_empty() {
        return Err(ApiError::bad_request(format!("{} cannot be empty", kind)));
    }
    if id.len() > MAX_ID_LEN {
        return Err(ApiError::bad_request(format!("{} too long (max {} chars)", kind, MAX_ID_LEN)));
    }
    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.' | '@'))
    {
        return Err(ApiError::bad_request(format!("{} contains invalid characters", kind)));
    }
    Ok(())
}

pub(crate) fn validate_text(kind: &str, text: &str, allow_empty: bool) -> Result<(), ApiError> {
    if !allow_empty && text.trim().is_empty() {
        return Err(ApiError::bad_request(format!("{} cannot be empty", kind)));
    }
    if text.len() > MAX_TEXT_BYTES {
        return Err(ApiError::bad_request(format!("{} exceeds 64KB limit", kind)));
    }
    if text.contains('\0') {
        return Err(ApiError::bad_request(format!("{} contains illegal null bytes", kind)));
    }
    Ok(())
}

/// Run a synchronous store call off the async workers
pub(crate) async fn blocking<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&MemorySystem) -> anyhow::Result<T> + Send + 'static,
{
    let memory = Arc::clone(&state.memory);
    tokio::task::spawn_blocking(move || op(&memory))
        .await
        .map_err(|e| ApiError::internal(format!("Worker task failed: {}", e)))?
        .map_err(|e| ApiError::internal(format!("{:#}", e)))
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/messages", post(memory_api::append_message))
        .route("/conversations/:id/tail", get(memory_api::get_tail))
        .route("/conversations/:id/context", post(memory_api::assemble_context))
        .route("/conversations/:id/responses", post(memory_api::record_response))
        .route("/admin/conversations/:id/consolidate", post(admin_api::consolidate))
        .route("/admin/conversations/:id/export", get(admin_api::export))
        .route("/admin/chunks/:id", get(admin_api::get_chunk))
        .route("/admin/import", post(admin_api::import))
        .route("/admin/stats", get(admin_api::stats))
        .route("/metrics", get(admin_api::render_metrics))
        .route("/healthz", get(admin_api::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(600)))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(memory: Arc<MemorySystem>, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router(AppState { memory });
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    Ok(())
}

/// Serve with background consolidation alongside. The scheduler is stopped before
/// this returns, including when the server fails to bind or errors out.
pub async fn run_service<F>(memory: Arc<MemorySystem>, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let scheduler = memory.start_scheduler();
    let served = serve(Arc::clone(&memory), addr, shutdown).await;
    if let Err(e) = &served {
        error!("HTTP server failed, stopping consolidation: {:#}", e);
    }
    let stopped = scheduler.stop().await;
    served?;
    stopped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("conversation_id", "chat-100123").is_ok());
        assert!(validate_id("conversation_id", "tg:-100123").is_ok());
        assert!(validate_id("conversation_id", "").is_err());
        assert!(validate_id("conversation_id", &"x".repeat(257)).is_err());
        assert!(validate_id("conversation_id", "a b").is_err());
        assert!(validate_id("conversation_id", "a/b").is_err());
    }

    #[test]
    fn test_validate_text() {
        assert!(validate_text("text", "hello", false).is_ok());
        assert!(validate_text("text", "  ", false).is_err());
        assert!(validate_text("context", "", true).is_ok());
        assert!(validate_text("text", "a\0b", false).is_err());
        assert!(validate_text("text", &"x".repeat(65_537), false).is_err());
    }
}

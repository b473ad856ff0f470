//! Administrative endpoints: on-demand consolidation, backfill import, chunk lookup, statistics, export, metrics
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use super::{blocking, validate_id, validate_text, ApiError, AppState};
use crate::import::read_jsonl;
use crate::metrics;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn consolidate(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id("conversation_id", &conversation_id)?;
    info!("On-demand consolidation requested for {}", conversation_id);

    match state.memory.force_consolidate(&conversation_id).await {
        Ok(report) => {
            metrics::inc_request("consolidate", "ok");
            Ok(Json(report))
        }
        Err(e) => {
            metrics::inc_request("consolidate", "error");
            warn!("On-demand consolidation failed for {}: {:#}", conversation_id, e);
            Err(ApiError::internal(format!("Consolidation failed: {:#}", e)))
        }
    }
}

pub async fn get_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id("chunk_id", &chunk_id)?;
    let lookup = chunk_id.clone();
    match blocking(&state, move |memory| Ok(memory.chunk(&lookup)?)).await? {
        Some(chunk) => Ok(Json(chunk)),
        None => Err(ApiError::not_found(format!("Chunk {} not found", chunk_id))),
    }
}

/// Backfill from a JSONL body, one message per line
pub async fn import(State(state): State<AppState>, body: String) -> Result<impl IntoResponse, ApiError> {
    let batch = read_jsonl(body.as_bytes()).map_err(|e| ApiError::bad_request(format!("{:#}", e)))?;
    for message in &batch.messages {
        validate_id("conversation_id", &message.conversation_id)?;
        validate_id("author_id", &message.author_id)?;
        validate_text("text", &message.text, false)?;
    }

    match state.memory.import(batch).await {
        Ok(report) => {
            metrics::inc_request("import", "ok");
            info!("Import stored {} new messages", report.inserted);
            Ok(Json(report))
        }
        Err(e) => {
            metrics::inc_request("import", "error");
            warn!("Import failed: {:#}", e);
            Err(ApiError::internal(format!("Import failed: {:#}", e)))
        }
    }
}

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let stats = blocking(&state, |memory| Ok(memory.stats()?)).await?;
    metrics::inc_request("stats", "ok");
    Ok(Json(stats))
}

pub async fn export(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id("conversation_id", &conversation_id)?;
    let text = blocking(&state, move |memory| Ok(memory.export(&conversation_id)?)).await?;
    metrics::inc_request("export", "ok");
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}

pub async fn render_metrics() -> Result<impl IntoResponse, ApiError> {
    let body = metrics::render().map_err(|e| ApiError::internal(format!("{:#}", e)))?;
    Ok((StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

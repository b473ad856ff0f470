//! Ingestion and context endpoints
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{blocking, validate_id, validate_text, ApiError, AppState};
use crate::metrics;

const MAX_TAIL_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct AppendMessageRequest {
    pub conversation_id: String,
    pub author_id: String,
    pub text: String,
    /// Epoch seconds; now when omitted
    pub timestamp: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct AppendMessageResponse {
    pub inserted: bool,
}

#[derive(Debug, Deserialize)]
pub struct TailParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub query: String,
    #[serde(default)]
    pub context: String,
}

#[derive(Debug, Deserialize)]
pub struct RecordResponseRequest {
    pub text: String,
}

pub async fn append_message(
    State(state): State<AppState>,
    Json(payload): Json<AppendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id("conversation_id", &payload.conversation_id)?;
    validate_id("author_id", &payload.author_id)?;
    validate_text("text", &payload.text, false)?;
    if let Some(ts) = payload.timestamp {
        if !ts.is_finite() || ts < 0.0 {
            return Err(ApiError::bad_request("timestamp must be a non-negative number"));
        }
    }

    let result = blocking(&state, move |memory| {
        Ok(memory.append(&payload.conversation_id, &payload.author_id, &payload.text, payload.timestamp)?)
    })
    .await;

    match result {
        Ok(inserted) => {
            metrics::inc_request("append_message", "ok");
            Ok((StatusCode::OK, Json(AppendMessageResponse { inserted })))
        }
        Err(e) => {
            metrics::inc_request("append_message", "error");
            Err(e)
        }
    }
}

pub async fn get_tail(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(params): Query<TailParams>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id("conversation_id", &conversation_id)?;
    let limit = params
        .limit
        .unwrap_or(state.memory.config().assembler.message_tail)
        .min(MAX_TAIL_LIMIT);

    let messages = blocking(&state, move |memory| Ok(memory.tail(&conversation_id, limit)?)).await?;
    metrics::inc_request("tail", "ok");
    Ok(Json(messages))
}

pub async fn assemble_context(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<ContextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id("conversation_id", &conversation_id)?;
    validate_text("query", &payload.query, true)?;
    validate_text("context", &payload.context, true)?;

    let assembled = blocking(&state, move |memory| {
        Ok(memory.context(&conversation_id, &payload.query, &payload.context))
    })
    .await?;
    debug!(
        "Context for {}: {} chunks",
        assembled.conversation_id,
        assembled.ranked_chunks.len()
    );
    metrics::inc_request("context", "ok");

    let prompt = assembled.render_prompt();
    let mut body = serde_json::to_value(&assembled)
        .map_err(|e| ApiError::internal(format!("Failed to serialize context: {}", e)))?;
    if let Some(object) = body.as_object_mut() {
        object.insert("prompt".to_string(), serde_json::Value::String(prompt));
    }
    Ok(Json(body))
}

pub async fn record_response(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(payload): Json<RecordResponseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_id("conversation_id", &conversation_id)?;
    validate_text("text", &payload.text, false)?;

    blocking(&state, move |memory| Ok(memory.record_response(&conversation_id, &payload.text)?)).await?;
    metrics::inc_request("record_response", "ok");
    Ok(StatusCode::NO_CONTENT)
}

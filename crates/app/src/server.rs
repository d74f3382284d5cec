//! HTTP surface of the chat service.

use crate::error::ApiError;
use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use pdf_chat_core::{ChatService, Query};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

pub type AppState = Arc<ChatService>;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/pdfs", get(list_pdfs))
        .route("/chat", post(chat))
        .route("/docs", get(docs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "message")]
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub grounded: bool,
    pub sources: Vec<String>,
    pub session_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PdfEntry {
    pub filename: String,
    pub processed: bool,
    pub ingested_at: Option<DateTime<Utc>>,
    pub chunk_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PdfListing {
    pub pdfs: Vec<PdfEntry>,
    pub total: usize,
}

async fn root() -> Json<Value> {
    Json(json!({ "message": "PDF Chat API is running!" }))
}

async fn health(State(service): State<AppState>) -> Result<Json<Value>, ApiError> {
    let stats = service.stats().await?;
    Ok(Json(json!({
        "status": "ok",
        "documents": stats.documents,
        "chunks": stats.chunks,
    })))
}

async fn list_pdfs(State(service): State<AppState>) -> Result<Json<PdfListing>, ApiError> {
    let pdfs = service
        .documents()
        .await?
        .into_iter()
        .map(|status| PdfEntry {
            filename: status.filename,
            processed: status.processed,
            ingested_at: status.ingested_at,
            chunk_count: status.chunk_count,
        })
        .collect::<Vec<_>>();

    Ok(Json(PdfListing {
        total: pdfs.len(),
        pdfs,
    }))
}

async fn chat(
    State(service): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let query = Query {
        text: request.question,
        session_id: Some(session_id.clone()),
        top_k: request.top_k,
    };
    let answer = service.chat(&query).await?;

    info!(
        session_id = %session_id,
        grounded = answer.grounded,
        sources = answer.sources.len(),
        "chat answered"
    );

    Ok(Json(ChatResponse {
        answer: answer.answer,
        grounded: answer.grounded,
        sources: answer.sources,
        session_id,
    }))
}

async fn docs() -> Json<Value> {
    Json(json!({
        "title": "PDF Chat API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            { "method": "GET", "path": "/health", "description": "Liveness and index size" },
            { "method": "GET", "path": "/pdfs", "description": "Documents in the folder with their processed flags" },
            {
                "method": "POST",
                "path": "/chat",
                "description": "Answer a question from the PDF content only",
                "body": { "question": "string", "session_id": "string (optional)", "top_k": "integer (optional)" }
            },
            { "method": "GET", "path": "/docs", "description": "This listing" }
        ]
    }))
}

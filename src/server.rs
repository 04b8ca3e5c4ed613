//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health`, `/api/health` | Health check (returns version) |
//! | `POST` | `/api/search` | Semantic search over the corpus |
//! | `POST` | `/api/chat` | Retrieval-augmented answer; `"stream": true` switches to SSE |
//! | `POST` | `/api/chat/stream` | Retrieval-augmented answer as server-sent events |
//! | `GET`  | `/api/documents` | Paginated document list |
//! | `POST` | `/api/documents` | Create and embed a document |
//! | `GET`  | `/api/documents/{id}` | Fetch one document |
//! | `PUT`  | `/api/documents/{id}` | Replace a document, re-embedding if the body changed |
//! | `DELETE` | `/api/documents/{id}` | Delete a document and its vector |
//! | `GET`  | `/api/analytics/popular` | Most recent query log entries |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must be at least 3 characters" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `retrieval_failed` (502),
//! `generation_failed` (502), `configuration` (500), `internal` (500).
//!
//! # Stream Contract
//!
//! Each event is one SSE frame:
//!
//! ```text
//! data: {"content":"Hel"}
//!
//! data: [DONE]
//!
//! event: error
//! data: {"message":"generation failed: ..."}
//! ```

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use docs_assistant_core::models::{ConversationTurn, DocumentInput, QueryLogEntry, SearchResult};
use docs_assistant_core::orchestrator::{ChatAnswer, EventStream, StreamEvent};
use docs_assistant_core::RagError;

use crate::analytics::recent_queries;
use crate::app::AppContext;
use crate::documents;

/// Entries returned by `/api/analytics/popular`.
const POPULAR_QUERIES_LIMIT: i64 = 10;

type AppState = Arc<AppContext>;

/// Bind to `[server].bind` and serve until Ctrl-C.
pub async fn run_server(ctx: Arc<AppContext>) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "listening");
    println!("Docs Assistant listening on http://{}", bind_addr);

    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/health", get(handle_health))
        .route("/api/search", post(handle_search))
        .route("/api/chat", post(handle_chat))
        .route("/api/chat/stream", post(handle_chat_stream))
        .route(
            "/api/documents",
            get(handle_list_documents).post(handle_create_document),
        )
        .route(
            "/api/documents/{id}",
            get(handle_get_document)
                .put(handle_update_document)
                .delete(handle_delete_document),
        )
        .route("/api/analytics/popular", get(handle_popular))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
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

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::Validation(_) => StatusCode::BAD_REQUEST,
            RagError::Retrieval(_) | RagError::Generation(_) => StatusCode::BAD_GATEWAY,
            RagError::Configuration(_) | RagError::Persistence(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Malformed bodies and query strings use the same error contract as
/// every other client fault.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

/// Pipeline errors keep their mapping; anything else is `internal`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<RagError>() {
            Ok(rag) => rag.into(),
            Err(other) => {
                error!(error = %format!("{:#}", other), "request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    code: "internal".to_string(),
                    message: format!("{:#}", other),
                }
            }
        }
    }
}

// ============ Health ============

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ============ Search ============

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query: String,
    pub count: usize,
}

async fn handle_search(
    State(ctx): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, AppError> {
    let Json(req) = body?;
    let min_chars = ctx.config.retrieval.min_query_chars;
    if req.query.trim().chars().count() < min_chars {
        return Err(bad_request(format!(
            "query must be at least {} characters",
            min_chars
        )));
    }

    let limit = req.limit.unwrap_or(ctx.config.retrieval.default_limit);
    let results = ctx.orchestrator.search(&req.query, limit).await?;

    Ok(Json(SearchResponse {
        count: results.len(),
        results,
        query: req.query,
    }))
}

// ============ Chat ============

#[derive(Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    fn into_turns(self) -> Result<Vec<ConversationTurn>, RagError> {
        self.messages
            .into_iter()
            .map(|m| ConversationTurn::parse(&m.role, m.content))
            .collect()
    }
}

async fn handle_chat(
    State(ctx): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = body?;
    if req.stream {
        return stream_chat(&ctx, req).await;
    }

    let turns = req.into_turns()?;
    let answer: ChatAnswer = ctx.orchestrator.chat(turns).await?;
    Ok(Json(answer).into_response())
}

async fn handle_chat_stream(
    State(ctx): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = body?;
    stream_chat(&ctx, req).await
}

/// Validation and configuration faults are plain JSON errors; a provider
/// that fails to open its stream is reported in-band as an `error` event.
async fn stream_chat(ctx: &AppContext, req: ChatRequest) -> Result<Response, AppError> {
    let turns = req.into_turns()?;
    match ctx.orchestrator.chat_stream(turns).await {
        Ok(events) => Ok(sse_response(events)),
        Err(err @ RagError::Generation(_)) => {
            error!(error = %err, "stream failed to start");
            let events = stream::once(async move { StreamEvent::Error(err.to_string()) });
            Ok(sse_response(events.boxed()))
        }
        Err(err) => Err(err.into()),
    }
}

fn sse_response(events: EventStream) -> Response {
    let frames = events.map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
    Sse::new(frames).into_response()
}

/// Wire encoding of one stream event.
pub fn to_sse_event(event: &StreamEvent) -> Event {
    match event {
        StreamEvent::Chunk(text) => {
            Event::default().data(serde_json::json!({ "content": text }).to_string())
        }
        StreamEvent::Done => Event::default().data("[DONE]"),
        StreamEvent::Error(message) => Event::default()
            .event("error")
            .data(serde_json::json!({ "message": message }).to_string()),
    }
}

// ============ Documents ============

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    20
}

async fn handle_list_documents(
    State(ctx): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params?;
    let page = documents::list_documents(&ctx, params.page, params.limit).await?;
    Ok(Json(page).into_response())
}

async fn handle_create_document(
    State(ctx): State<AppState>,
    body: Result<Json<DocumentInput>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(input) = body?;
    let doc = documents::create_document(&ctx, input).await?;
    Ok((StatusCode::CREATED, Json(doc)).into_response())
}

async fn handle_get_document(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    match documents::get_document(&ctx, &id).await? {
        Some(doc) => Ok(Json(doc).into_response()),
        None => Err(not_found(format!("document not found: {}", id))),
    }
}

async fn handle_update_document(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<DocumentInput>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(input) = body?;
    match documents::update_document(&ctx, &id, input).await? {
        Some(doc) => Ok(Json(doc).into_response()),
        None => Err(not_found(format!("document not found: {}", id))),
    }
}

async fn handle_delete_document(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if documents::delete_document(&ctx, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("document not found: {}", id)))
    }
}

// ============ Analytics ============

async fn handle_popular(
    State(ctx): State<AppState>,
) -> Result<Json<Vec<QueryLogEntry>>, AppError> {
    let entries = recent_queries(&ctx.pool, POPULAR_QUERIES_LIMIT).await?;
    Ok(Json(entries))
}

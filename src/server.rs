//! HTTP API server.
//!
//! Exposes session management and the ask pipeline as a JSON HTTP API,
//! with a server-sent-events endpoint for incremental answer delivery.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/api/search/session/create` | Create a chat session |
//! | `POST`   | `/api/search/query` | Ask a question (full response) |
//! | `POST`   | `/api/search/stream` | Ask a question (SSE stream) |
//! | `GET`    | `/api/search/history/{session_id}` | Paginated conversation history |
//! | `GET`    | `/api/search/sessions` | List a user's active sessions |
//! | `PUT`    | `/api/search/session/rename/{session_id}` | Rename a session |
//! | `DELETE` | `/api/search/session/delete/{session_id}` | Soft-delete a session |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses share one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (403), `not_found` (404),
//! `internal` (500). Stream requests report failures as a terminal `error`
//! event instead of an HTTP status.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding;
use crate::error::ServiceError;
use crate::generation;
use crate::models::{Message, Session};
use crate::orchestrator::{AskRequest, AskResponse, AskService};
use crate::session::SqliteSessionStore;
use crate::stores::{SqliteContentStore, SqliteGraphStore, SqliteVectorIndex};
use crate::{db, migrate};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<AskService>,
}

/// Starts the HTTP server on the configured bind address. Runs until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    migrate::run_migrations(config).await?;
    let service = build_service(config).await?;
    let state = AppState { service };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/search/session/create", post(handle_create_session))
        .route("/api/search/query", post(handle_query))
        .route("/api/search/stream", post(handle_stream))
        .route("/api/search/history/{session_id}", get(handle_history))
        .route("/api/search/sessions", get(handle_list_sessions))
        .route(
            "/api/search/session/rename/{session_id}",
            put(handle_rename_session),
        )
        .route(
            "/api/search/session/delete/{session_id}",
            delete(handle_delete_session),
        )
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %config.server.bind, "search API listening");

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Wire up the pipeline service from configuration: one SQLite pool shared
/// by all stores, plus the configured embedding and generation backends.
pub async fn build_service(config: &Config) -> anyhow::Result<Arc<AskService>> {
    let pool = db::connect(config).await?;

    let service = AskService::new(
        config.retrieval.clone(),
        config.prompts.clone(),
        Arc::new(SqliteSessionStore::new(pool.clone())),
        Arc::new(SqliteContentStore::new(pool.clone())),
        Arc::new(SqliteVectorIndex::new(pool.clone())),
        Arc::new(SqliteGraphStore::new(pool)),
        embedding::create_backend(&config.embedding)?,
        generation::create_backend(&config.generation)?,
    );

    Ok(Arc::new(service))
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g. `"bad_request"`, `"unauthorized"`).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
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

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let status = match &err {
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::FORBIDDEN,
            ServiceError::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
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

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "internal error");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/search/session/create ============

#[derive(Deserialize)]
struct CreateSessionRequest {
    user_id: String,
    #[serde(default)]
    name: Option<String>,
}

async fn handle_create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<Session>, AppError> {
    if req.user_id.trim().is_empty() {
        return Err(bad_request("user_id must not be empty"));
    }

    let session = state
        .service
        .sessions()
        .create_session(&req.user_id, req.name.as_deref())
        .await
        .map_err(internal)?;

    Ok(Json(session))
}

// ============ POST /api/search/query ============

#[derive(Deserialize)]
struct QueryRequest {
    session_id: String,
    user_id: String,
    query: String,
    #[serde(default)]
    file_ids: Option<Vec<String>>,
}

impl From<QueryRequest> for AskRequest {
    fn from(req: QueryRequest) -> Self {
        AskRequest {
            session_id: req.session_id,
            user_id: req.user_id,
            query: req.query,
            file_ids: req.file_ids,
        }
    }
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let response = state.service.ask(&req.into()).await?;
    Ok(Json(response))
}

// ============ POST /api/search/stream ============

async fn handle_stream(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let rx = state.service.ask_stream(req.into());

    let stream = ReceiverStream::new(rx).map(|event| {
        let json = serde_json::to_string(&event).map_err(axum::Error::new)?;
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============ GET /api/search/history/{session_id} ============

#[derive(Deserialize)]
struct HistoryQuery {
    user_id: String,
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_page_size")]
    page_size: i64,
}

fn default_page() -> i64 {
    1
}
fn default_page_size() -> i64 {
    20
}

#[derive(Serialize)]
struct HistoryResponse {
    messages: Vec<Message>,
    total: i64,
    page: i64,
    page_size: i64,
}

async fn handle_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    if params.page < 1 || params.page_size < 1 {
        return Err(bad_request("page and page_size must be >= 1"));
    }

    let sessions = state.service.sessions();
    if sessions
        .validate_session(&session_id, &params.user_id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(ServiceError::Unauthorized.into());
    }

    let (messages, total) = sessions
        .history(&session_id, params.page, params.page_size)
        .await
        .map_err(internal)?;

    Ok(Json(HistoryResponse {
        messages,
        total,
        page: params.page,
        page_size: params.page_size,
    }))
}

// ============ GET /api/search/sessions ============

#[derive(Deserialize)]
struct UserQuery {
    user_id: String,
}

#[derive(Serialize)]
struct SessionListResponse {
    sessions: Vec<Session>,
}

async fn handle_list_sessions(
    State(state): State<AppState>,
    Query(params): Query<UserQuery>,
) -> Result<Json<SessionListResponse>, AppError> {
    let sessions = state
        .service
        .sessions()
        .list_sessions(&params.user_id)
        .await
        .map_err(internal)?;

    Ok(Json(SessionListResponse { sessions }))
}

// ============ PUT /api/search/session/rename/{session_id} ============

#[derive(Deserialize)]
struct RenameRequest {
    user_id: String,
    name: String,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

async fn handle_rename_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<OkResponse>, AppError> {
    if req.name.trim().is_empty() {
        return Err(bad_request("name must not be empty"));
    }

    let renamed = state
        .service
        .sessions()
        .rename_session(&session_id, &req.user_id, req.name.trim())
        .await
        .map_err(internal)?;

    if !renamed {
        return Err(not_found("session not found"));
    }
    Ok(Json(OkResponse { ok: true }))
}

// ============ DELETE /api/search/session/delete/{session_id} ============

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<UserQuery>,
) -> Result<Json<OkResponse>, AppError> {
    let deleted = state
        .service
        .sessions()
        .delete_session(&session_id, &params.user_id)
        .await
        .map_err(internal)?;

    if !deleted {
        return Err(not_found("session not found"));
    }
    Ok(Json(OkResponse { ok: true }))
}

//! HTTP JSON API and MCP mount point.
//!
//! Exposes the silo manager and query engine over Axum, plus an MCP
//! Streamable HTTP endpoint ([`crate::mcp::McpBridge`]) at `/mcp` for
//! external agents.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Hybrid search over one or all silos |
//! | `GET` | `/silos` | Status of every configured silo |
//! | `POST` | `/silos/:name/start` | Reconcile and start watching a silo |
//! | `POST` | `/silos/:name/stop` | Stop a silo's watcher |
//! | `POST` | `/silos/:name/rebuild` | Wipe and fully re-index a silo |
//! | `DELETE` | `/silos/:name` | Stop a silo and remove its database file |
//! | `GET` | `/activity` | Recent activity events across all silos |
//! | `GET` | `/embeddings/check` | Probe an HTTP embedding server |
//! | `GET` | `/health` | Health check |
//! | `*` | `/mcp` | MCP Streamable HTTP bridge |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted, matching the
//! teacher's `server.rs` (supports browser-based and cross-origin MCP
//! clients).
//!
//! Grounded on the teacher's `server.rs` (`AppState`, `AppError`/
//! `IntoResponse`, CORS-any layer, route handler shape), retargeted from
//! the connector/document model to silo admin, search, and activity.

use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding;
use crate::mcp::McpBridge;
use crate::models::{ActivityEvent, SearchResult, SearchWeights};
use crate::search::{self, SiloSearchContext};
use crate::silo_manager::{SiloManager, SiloStatus};

#[derive(Clone)]
struct AppState {
    manager: Arc<SiloManager>,
}

/// Starts the HTTP server, mounting the JSON API and the MCP bridge on
/// the address configured in `[server].bind`. Runs until the process is
/// terminated. `manager` must already have had [`SiloManager::start_all`]
/// called on it.
pub async fn run_server(config: &Config, manager: Arc<SiloManager>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState { manager: manager.clone() };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mcp_service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(McpBridge::new(manager.clone())),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default().into(),
        Default::default(),
    );

    let app = Router::new()
        .route("/search", post(handle_search))
        .route("/silos", get(handle_list_silos))
        .route("/silos/{name}/start", post(handle_start_silo))
        .route("/silos/{name}/stop", post(handle_stop_silo))
        .route("/silos/{name}/rebuild", post(handle_rebuild_silo))
        .route("/silos/{name}", delete(handle_delete_silo))
        .route("/activity", get(handle_activity))
        .route("/embeddings/check", get(handle_check_embeddings))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
        .nest_service("/mcp", mcp_service);

    tracing::info!(bind = %bind_addr, "silo engine listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
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

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

fn classify(e: anyhow::Error) -> AppError {
    let msg = e.to_string();
    if msg.contains("no such silo") || msg.contains("not found") {
        not_found(msg)
    } else {
        internal_error(msg)
    }
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    /// Restrict the search to a single silo; omit to search all.
    #[serde(default)]
    silo: Option<String>,
    #[serde(default = "default_search_limit")]
    max_results: usize,
    /// Named weight preset (`balanced`, `semantic`, `keyword`, `code`),
    /// or omit for balanced.
    #[serde(default)]
    weights: Option<String>,
}

fn default_search_limit() -> usize {
    10
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let weights = match req.weights.as_deref() {
        Some(name) => SearchWeights::by_name(name)
            .ok_or_else(|| bad_request(format!("unknown weight preset: {name}")))?,
        None => SearchWeights::default(),
    };

    let names = match &req.silo {
        Some(name) => vec![name.clone()],
        None => state.manager.silo_names().await,
    };

    let mut pools = Vec::new();
    let mut embedders = Vec::new();
    for name in &names {
        let pool = state.manager.pool(name).await.map_err(classify)?;
        let embedder = state.manager.embedder(name).await.map_err(classify)?;
        pools.push((name.clone(), pool));
        embedders.push(embedder);
    }
    let contexts: Vec<SiloSearchContext> = pools
        .iter()
        .zip(embedders.iter())
        .map(|((name, pool), embedder)| SiloSearchContext {
            name,
            pool,
            embedder: embedder.as_ref(),
        })
        .collect();

    let results = search::search(&contexts, &req.query, weights, req.max_results)
        .await
        .map_err(|e| internal_error(e.to_string()))?;

    Ok(Json(SearchResponse { results }))
}

// ============ GET /silos ============

#[derive(Serialize)]
struct SiloStatusResponse {
    name: String,
    state: String,
    file_count: i64,
    chunk_count: i64,
    db_size_bytes: u64,
    last_update: Option<chrono::DateTime<chrono::Utc>>,
    watcher_running: bool,
    error_message: Option<String>,
    reconcile_progress: Option<crate::reconciler::ReconcileProgress>,
    model_mismatch: bool,
    resolved_model: String,
}

impl From<SiloStatus> for SiloStatusResponse {
    fn from(s: SiloStatus) -> Self {
        SiloStatusResponse {
            name: s.name,
            state: format!("{:?}", s.state).to_lowercase(),
            file_count: s.file_count,
            chunk_count: s.chunk_count,
            db_size_bytes: s.db_size_bytes,
            last_update: s.last_update,
            watcher_running: s.watcher_running,
            error_message: s.error_message,
            reconcile_progress: s.reconcile_progress,
            model_mismatch: s.model_mismatch,
            resolved_model: s.resolved_model,
        }
    }
}

#[derive(Serialize)]
struct SilosResponse {
    silos: Vec<SiloStatusResponse>,
}

async fn handle_list_silos(State(state): State<AppState>) -> Result<Json<SilosResponse>, AppError> {
    let mut silos = Vec::new();
    for name in state.manager.silo_names().await {
        let status = state.manager.status(&name).await.map_err(classify)?;
        silos.push(status.into());
    }
    Ok(Json(SilosResponse { silos }))
}

// ============ POST /silos/:name/start, /stop, /rebuild, DELETE /silos/:name ============

async fn handle_start_silo(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<SiloStatusResponse>, AppError> {
    state.manager.start_silo(&name).await.map_err(classify)?;
    let status = state.manager.status(&name).await.map_err(classify)?;
    Ok(Json(status.into()))
}

async fn handle_stop_silo(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<SiloStatusResponse>, AppError> {
    state.manager.stop_silo(&name).await.map_err(classify)?;
    let status = state.manager.status(&name).await.map_err(classify)?;
    Ok(Json(status.into()))
}

/// Wipes the silo's indexed content and re-indexes every file from
/// scratch. The engine has no incremental re-embedding path, so this is
/// the only way to pick up a model change or repair a corrupted index.
async fn handle_rebuild_silo(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<SiloStatusResponse>, AppError> {
    state.manager.rebuild_silo(&name).await.map_err(classify)?;
    let status = state.manager.status(&name).await.map_err(classify)?;
    Ok(Json(status.into()))
}

async fn handle_delete_silo(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Result<StatusCode, AppError> {
    state.manager.delete_silo(&name).await.map_err(classify)?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ GET /activity ============

#[derive(Deserialize)]
struct ActivityQuery {
    #[serde(default = "default_activity_limit")]
    limit: usize,
}

fn default_activity_limit() -> usize {
    50
}

#[derive(Serialize)]
struct ActivityResponse {
    events: Vec<ActivityEvent>,
}

async fn handle_activity(
    State(state): State<AppState>,
    Query(params): Query<ActivityQuery>,
) -> Json<ActivityResponse> {
    let events = state.manager.recent_activity(params.limit).await;
    Json(ActivityResponse { events })
}

// ============ GET /embeddings/check ============

#[derive(Deserialize)]
struct CheckEmbeddingsQuery {
    url: String,
}

#[derive(Serialize)]
struct CheckEmbeddingsResponse {
    models: Vec<String>,
}

async fn handle_check_embeddings(
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<CheckEmbeddingsResponse>, AppError> {
    let query: CheckEmbeddingsQuery = CheckEmbeddingsQuery {
        url: params
            .get("url")
            .cloned()
            .ok_or_else(|| bad_request("missing required query parameter: url"))?,
    };

    match embedding::check_connection(&query.url).await {
        Some(models) => Ok(Json(CheckEmbeddingsResponse { models })),
        None => Err(AppError {
            status: StatusCode::BAD_GATEWAY,
            code: "unreachable".to_string(),
            message: format!("no embedding server reachable at {}", query.url),
        }),
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

use axum::extract::{ConnectInfo, Path, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;
use crate::error::{ErrorKind, OperationError};
use crate::exec::OutputEvent;
use crate::ops::{Dispatcher, OperationRequest};
use crate::security::{AuthFailure, LineRange, SessionGate};
use crate::transport::mcp::handle_message;

/// Shared, read-only state for every handler
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub gate: SessionGate,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, gate: SessionGate) -> Self {
        Self { dispatcher, gate }
    }
}

/// Envelope for buffered responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    fn success(data: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(error: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let ApiError::Operation(err) = self;
        let status = match err.status_kind() {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "operation failed");
        }
        (status, Json(ApiResponse::failure(err.to_string()))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct CommandBody {
    #[serde(default)]
    args: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReadFileBody {
    #[serde(default)]
    path: Option<String>,
    #[serde(flatten)]
    line_range: LineRange,
}

#[derive(Debug, Deserialize)]
struct AuthQuery {
    key: Option<String>,
}

pub fn build_router(state: Arc<AppState>, cors_allow_any_origin: bool) -> Router {
    let api_router = Router::new()
        .route("/api/repos", get(list_repos))
        .route("/api/repos/{repo}/make", post(run_make))
        .route("/api/repos/{repo}/git", post(run_git))
        .route("/api/repos/{repo}/ls", post(run_ls))
        .route("/api/repos/{repo}/read_file", post(read_file))
        .route("/api/repos/{repo}/env", get(env_info))
        .route("/api/repos/{repo}/make/stream", post(stream_make))
        .route("/api/repos/{repo}/git/stream", post(stream_git))
        .route("/api/repos/{repo}/ls/stream", post(stream_ls))
        .route("/mcp", post(mcp_message))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session))
        .with_state(state);

    let mut router = Router::new()
        .route("/health", get(health))
        .merge(api_router)
        .layer(TraceLayer::new_for_http());

    if cors_allow_any_origin {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Bind the listener and serve until Ctrl-C
pub async fn serve(state: Arc<AppState>, config: &HttpConfig) -> io::Result<()> {
    let listener = TcpListener::bind(config.bind_address()).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        session_key = state.gate.is_enabled(),
        "MCP build server listening on HTTP"
    );

    let router = build_router(state, config.cors_allow_any_origin);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn require_session(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let query_key = Query::<AuthQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(query)| query.key);

    let verdict = state.gate.check(authorization, query_key.as_deref());
    match verdict {
        Ok(()) => next.run(req).await,
        Err(failure) => {
            let remote = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            tracing::warn!(remote = %remote, path = %req.uri().path(), reason = ?failure, "unauthorized request");
            unauthorized(failure)
        }
    }
}

fn unauthorized(failure: AuthFailure) -> Response {
    match failure {
        AuthFailure::MissingToken => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            Json(json!({
                "error": "Unauthorized",
                "message": "Missing session key. Use 'Authorization: Bearer <key>' or '?key=<key>'",
            })),
        )
            .into_response(),
        AuthFailure::InvalidToken => (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Unauthorized",
                "message": "Invalid session key",
            })),
        )
            .into_response(),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_repos(State(state): State<Arc<AppState>>) -> Result<Json<ApiResponse>, ApiError> {
    run_buffered(&state, OperationRequest::List).await
}

async fn run_make(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<Json<ApiResponse>, ApiError> {
    let request = OperationRequest::RunBuild {
        repo: Some(repo),
        args: body.args.unwrap_or_default(),
    };
    run_buffered(&state, request).await
}

async fn run_git(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<Json<ApiResponse>, ApiError> {
    let request = OperationRequest::RunVcs {
        repo: Some(repo),
        args: body.args.unwrap_or_default(),
    };
    run_buffered(&state, request).await
}

async fn run_ls(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<Json<ApiResponse>, ApiError> {
    let request = OperationRequest::ListDir {
        repo: Some(repo),
        args: body.args.unwrap_or_default(),
    };
    run_buffered(&state, request).await
}

async fn read_file(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Json(body): Json<ReadFileBody>,
) -> Result<Json<ApiResponse>, ApiError> {
    let request = OperationRequest::ReadFile {
        repo: Some(repo),
        path: body.path.unwrap_or_default(),
        line_range: body.line_range,
    };
    run_buffered(&state, request).await
}

async fn env_info(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
) -> Result<Json<ApiResponse>, ApiError> {
    run_buffered(&state, OperationRequest::EnvInfo { repo: Some(repo) }).await
}

async fn run_buffered(state: &AppState, request: OperationRequest) -> Result<Json<ApiResponse>, ApiError> {
    let text = state.dispatcher.dispatch(&request).await?;
    Ok(Json(ApiResponse::success(text)))
}

async fn stream_make(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = OperationRequest::RunBuild {
        repo: Some(repo),
        args: body.args.unwrap_or_default(),
    };
    run_streaming(state, request).await
}

async fn stream_git(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = OperationRequest::RunVcs {
        repo: Some(repo),
        args: body.args.unwrap_or_default(),
    };
    run_streaming(state, request).await
}

async fn stream_ls(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    Json(body): Json<CommandBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = OperationRequest::ListDir {
        repo: Some(repo),
        args: body.args.unwrap_or_default(),
    };
    run_streaming(state, request).await
}

/// Validation and spawn failures are answered with JSON before the stream starts
async fn run_streaming(
    state: Arc<AppState>,
    request: OperationRequest,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let events = state.dispatcher.dispatch_streaming(&request).await?;
    let stream = events.map(|event| Ok::<Event, Infallible>(to_sse_event(&event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &OutputEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| {
            Event::default()
                .event("error")
                .data(format!("failed to encode event: {}", e))
        })
}

async fn mcp_message(State(state): State<Arc<AppState>>, Json(message): Json<Value>) -> Response {
    match handle_message(&state.dispatcher, &message).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

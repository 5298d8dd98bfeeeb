//! HTTP routes.

use std::{convert::Infallible, sync::Arc};

use agent_relay_core::{Conversation, StreamRequest};
use agent_relay_session::{RelayError, SessionManager};
use axum::{
    Json, Router,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{AUTHORIZATION, CACHE_CONTROL},
    },
    response::{IntoResponse, Response, Sse},
    routing::{get, post},
};
use chrono::Utc;
use futures::StreamExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::{Credentials, TokenStore},
    protocol::{
        AgentsResponse, ChatRequest, ErrorResponse, HealthResponse, LoginRequest, LoginResponse,
        sse_event,
    },
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub tokens: Arc<TokenStore>,
    pub credentials: Arc<Credentials>,
}

impl AppState {
    #[must_use]
    pub fn new(manager: Arc<SessionManager>, tokens: Arc<TokenStore>, credentials: Credentials) -> Self {
        Self {
            manager,
            tokens,
            credentials: Arc::new(credentials),
        }
    }
}

/// Build the relay router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/agents", get(list_agents))
        .route("/api/health", get(health))
        .route("/chat/completions", post(chat_completions))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Failure answered with a status code and a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { detail: self.detail })).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let status = match err {
            RelayError::AgentNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::SourceUnavailable(_)
            | RelayError::LaunchFailed(_)
            | RelayError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    tracing::info!(username = %req.username, "Login attempt");
    if !state.credentials.matches(&req.username, &req.password) {
        tracing::warn!(username = %req.username, "Login failed");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid credentials"));
    }

    let purged = state.tokens.purge_expired();
    if purged > 0 {
        tracing::debug!(purged, "Dropped expired tokens");
    }
    let (token, expires) = state.tokens.issue(&req.username);
    tracing::info!(username = %req.username, "Login successful");
    Ok(Json(LoginResponse { token, expires }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

async fn list_agents(State(state): State<AppState>) -> Result<Json<AgentsResponse>, ApiError> {
    let agents = state.manager.catalog().list().await.map_err(|e| {
        tracing::error!("Failed to list agents: {e}");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(AgentsResponse { agents }))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers).ok_or_else(|| {
        ApiError::new(StatusCode::UNAUTHORIZED, "Missing token in Authorization header")
    })?;
    if state.tokens.validate(token).is_none() {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "Invalid or expired token"));
    }

    if req.messages.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "No messages provided"));
    }
    if req.agent_name.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "No agent_name provided"));
    }
    if !req.stream {
        return Err(ApiError::new(
            StatusCode::NOT_IMPLEMENTED,
            "Non-streaming mode not implemented yet",
        ));
    }

    let request = StreamRequest::new(req.agent_name, Conversation::new(req.messages), token)
        .with_max_tokens(req.max_tokens);
    let events = state
        .manager
        .stream(request)
        .await?
        .map(|event| Ok::<_, Infallible>(sse_event(&event)));

    Ok((
        [
            (CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Sse::new(events),
    )
        .into_response())
}

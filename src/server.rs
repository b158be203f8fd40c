//! HTTP chat server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Answer `{"question": "..."}` |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Errors are plain text so a widget can show them verbatim:
//!
//! | Status | Body | Cause |
//! |--------|------|-------|
//! | `400` | `Invalid question` | body is not JSON, or `question` is missing, not a string, or blank |
//! | `500` | `<Provider> API key missing` | the generation API key is not set |
//! | `500` | `Server Error` | retrieval or generation failed before any output |
//!
//! The key is checked on every request before anything is sent upstream.
//!
//! # Streaming
//!
//! In `stream` mode the first fragment is awaited before the status line is
//! written, so an upstream failure with no output is still a `500`. Later
//! fragments are relayed as they arrive; a failure after that point is
//! logged and ends the body.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the chat widget can be
//! embedded on any page.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{Config, Credential, ResponseMode};
use crate::error::{ChatError, ConfigurationError, ValidationError};
use crate::models::ChatAnswer;
use crate::pipeline::ChatPipeline;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<ChatPipeline>,
    /// Generation API key, resolved per request.
    credential: Credential,
    /// Provider label used in the missing-key message.
    provider: String,
    response: ResponseMode,
}

impl AppState {
    pub fn new(
        pipeline: Arc<ChatPipeline>,
        credential: Credential,
        provider: impl Into<String>,
        response: ResponseMode,
    ) -> Self {
        Self {
            pipeline,
            credential,
            provider: provider.into(),
            response,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pipeline = ChatPipeline::from_config(config)?;
        Ok(Self::new(
            Arc::new(pipeline),
            config.generation.credential(),
            config.generation.provider.clone(),
            config.server.response,
        ))
    }
}

/// Builds the application router. Exposed so tests can serve it on any listener.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the chat server on `[server].bind` and runs until the process ends.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    if state.credential.resolve().is_none() {
        warn!(
            env = state.credential.source_name(),
            "generation API key is not set; /api/chat will answer 500 until it is"
        );
    }

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;

    info!(addr = %config.server.bind, "chat server listening");
    println!("Chat server listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

/// Plain-text error response.
struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation(e) => {
                warn!(error = %e, "rejected chat request");
                AppError {
                    status: StatusCode::BAD_REQUEST,
                    message: "Invalid question".to_string(),
                }
            }
            ChatError::Configuration(e) => {
                error!(error = %e, "chat request cannot be served");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: e.to_string(),
                }
            }
            ChatError::Provider(e) => {
                error!(error = %e, "chat request failed");
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Server Error".to_string(),
                }
            }
        }
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

// ============ POST /api/chat ============

/// Extract a usable question from the raw request body.
fn parse_question(body: &[u8]) -> Result<String, ValidationError> {
    let request: serde_json::Value = serde_json::from_slice(body)?;
    match request.get("question") {
        Some(serde_json::Value::String(q)) if !q.trim().is_empty() => Ok(q.clone()),
        _ => Err(ValidationError::InvalidQuestion),
    }
}

/// Handler for `POST /api/chat`.
///
/// The body is taken as raw bytes so that malformed JSON is reported with
/// the same `400 Invalid question` as a bad `question` field.
async fn handle_chat(State(state): State<AppState>, body: Bytes) -> Result<Response, AppError> {
    let question = parse_question(&body).map_err(ChatError::from)?;

    if state.credential.resolve().is_none() {
        return Err(ChatError::from(ConfigurationError::MissingCredential {
            provider: state.provider.clone(),
        })
        .into());
    }

    match state.response {
        ResponseMode::Json => {
            let answer = state
                .pipeline
                .answer(&question)
                .await
                .map_err(ChatError::from)?;
            Ok(Json(ChatAnswer { answer }).into_response())
        }
        ResponseMode::Stream => stream_answer(&state, &question).await,
    }
}

async fn stream_answer(state: &AppState, question: &str) -> Result<Response, AppError> {
    let mut fragments = state
        .pipeline
        .answer_stream(question)
        .await
        .map_err(ChatError::from)?;

    // Hold the status line until there is output (or a clean empty answer).
    let first = match fragments.next().await {
        Some(Ok(fragment)) => Some(fragment),
        Some(Err(e)) => return Err(ChatError::from(e).into()),
        None => None,
    };

    let body = stream::iter(first.map(Ok))
        .chain(fragments)
        .scan((), |_, item| {
            future::ready(match item {
                Ok(fragment) => Some(Ok::<Bytes, Infallible>(Bytes::from(fragment))),
                Err(e) => {
                    error!(error = %e, "answer stream failed after output started");
                    None
                }
            })
        });

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response())
}

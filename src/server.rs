//! HTTP control and streaming endpoints.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::mjpeg;
use crate::session::{Session, SessionError, StartOutcome, StatusReport, StopOutcome};

/// Error type for HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A lifecycle transition failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// `/stream` was requested while the session is not streaming.
    #[error("Stream not active")]
    StreamNotActive,
    /// The blocking lifecycle task did not complete.
    #[error("Lifecycle task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::StreamNotActive => StatusCode::SERVICE_UNAVAILABLE,
            Self::Session(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(Message::error(self.to_string()));
        (status, body).into_response()
    }
}

/// `{"status": ..., "message": ...}` response body.
#[derive(Debug, Serialize)]
struct Message {
    status: &'static str,
    message: String,
}

impl Message {
    fn success(message: &str) -> Self {
        Self {
            status: "success",
            message: message.to_owned(),
        }
    }

    const fn error(message: String) -> Self {
        Self {
            status: "error",
            message,
        }
    }
}

/// Build the router serving `session`.
pub fn router(session: Arc<Session>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/stream-status", get(stream_status))
        .route("/start-stream", post(start_stream))
        .route("/stop-stream", post(stop_stream))
        .route("/status", get(status))
        .route("/stream", get(stream))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(session)
}

async fn index() -> &'static str {
    "Camera Streaming Server"
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn stream_status(State(session): State<Arc<Session>>) -> impl IntoResponse {
    if session.is_frame_flowing() {
        (StatusCode::OK, Json(json!({ "status": "streaming" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "not streaming" })),
        )
    }
}

async fn start_stream(State(session): State<Arc<Session>>) -> Result<Json<Message>, ApiError> {
    info!("received start stream request");
    let outcome = tokio::task::spawn_blocking(move || session.start()).await??;

    let message = match outcome {
        StartOutcome::Started(_) => "Camera stream started",
        StartOutcome::AlreadyStreaming => "Camera already streaming",
    };
    Ok(Json(Message::success(message)))
}

async fn stop_stream(State(session): State<Arc<Session>>) -> Result<Json<Message>, ApiError> {
    info!("received stop stream request");
    let outcome = tokio::task::spawn_blocking(move || session.stop()).await??;

    let message = match outcome {
        StopOutcome::Stopped => "Camera stream stopped",
        StopOutcome::AlreadyStopped => "Camera already stopped",
    };
    Ok(Json(Message::success(message)))
}

async fn status(State(session): State<Arc<Session>>) -> Json<StatusReport> {
    Json(session.status())
}

async fn stream(State(session): State<Arc<Session>>) -> Result<Response, ApiError> {
    let Some(encoder) = session.encoder() else {
        warn!("stream requested while not streaming");
        return Err(ApiError::StreamNotActive);
    };
    info!("viewer attached to stream");

    Ok((
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
        ],
        Body::from_stream(encoder.into_stream()),
    )
        .into_response())
}

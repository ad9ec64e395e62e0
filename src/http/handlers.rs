//! Route handlers and the JSON error envelope.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::events::{ChannelSink, StreamEvent, DONE_MARKER};
use super::AppState;
use crate::jobs::{StreamSink, Submission};
use crate::models::request::{Metadata, RequestContext};
use crate::AppError;

// ── Error envelope ──────────────────────────────────────

/// Error rendered as `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Build an error with an explicit status and code.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// 401 for a request without a key.
    #[must_use]
    pub fn missing_api_key() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "MISSING_API_KEY",
            "API key is required",
        )
    }

    /// 401 for a request with the wrong key.
    #[must_use]
    pub fn invalid_api_key() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "INVALID_API_KEY", "Invalid API key")
    }

    /// 404 for an unknown resource.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// HTTP status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let message = err.to_string();
        match err {
            AppError::Validation(_) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
            }
            AppError::NotFound(_) => Self::not_found(message),
            AppError::Conflict(_) => Self::new(StatusCode::CONFLICT, "CONFLICT", message),
            AppError::Registry(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                message,
            ),
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            format!("Invalid request body: {}", rejection.body_text()),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Request bodies ──────────────────────────────────────

/// Body of `POST /requests`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBody {
    /// Instruction text.
    pub prompt: String,
    /// Optional execution context.
    #[serde(default)]
    pub context: RequestContext,
    /// Optional caller metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Optional conversation session.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl From<SubmitBody> for Submission {
    fn from(body: SubmitBody) -> Self {
        Self {
            prompt: body.prompt,
            context: body.context,
            metadata: body.metadata,
            session_id: body.session_id,
        }
    }
}

// ── Handlers ────────────────────────────────────────────

/// `GET /`: service information.
pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "health": "/api/agent/health",
    }))
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

/// `POST /api/agent/requests`: accept a job.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body?;
    let response = state.jobs.submit(body.into())?;
    info!(request_id = %response.request_id, "agent request submitted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": response,
            "message": "Request accepted and queued for processing",
        })),
    ))
}

/// `GET /api/agent/requests/{id}`: current record.
pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let response = state
        .jobs
        .status(&request_id)
        .ok_or_else(|| ApiError::not_found("Request not found"))?;
    Ok(Json(json!({ "data": response })))
}

/// `DELETE /api/agent/requests/{id}`: cancel a queued or running job.
pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let response = state.jobs.cancel(&request_id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "data": response,
            "message": "Cancellation requested",
        })),
    ))
}

/// `GET /api/agent/stats`: queue counters.
pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.jobs.stats()?;
    Ok(Json(json!({ "data": stats })))
}

/// `GET /api/agent/health`: liveness plus queue counters.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let timestamp = Utc::now().to_rfc3339();
    match state.jobs.stats() {
        Ok(queue) => Json(json!({
            "status": "healthy",
            "timestamp": timestamp,
            "queue": queue,
        }))
        .into_response(),
        Err(err) => {
            tracing::error!(%err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": timestamp,
                    "error": "Queue service unavailable",
                })),
            )
                .into_response()
        }
    }
}

/// `GET /api/agent/sessions/{id}/history`: stored conversation.
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let entries = state.jobs.sessions().history(&session_id).await;
    Json(json!({
        "data": {
            "sessionId": session_id,
            "history": entries,
        }
    }))
}

/// `DELETE /api/agent/sessions/{id}/history`: forget a conversation.
pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Json<serde_json::Value> {
    let cleared = state.jobs.sessions().clear(&session_id).await;
    Json(json!({
        "data": {
            "sessionId": session_id,
            "cleared": cleared,
        },
        "message": "Conversation history cleared",
    }))
}

/// `POST /api/agent/stream`: run a prompt and stream its output as SSE.
///
/// Frames: one `status`, any number of `chunk`, exactly one `complete` or
/// `error`, then `[DONE]`. The execution is cancelled if the client
/// disconnects.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SubmitBody>, JsonRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Json(body) = body?;
    let submission = Submission::from(body);
    state.jobs.validate(&submission)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(StreamEvent::started());

    let relay = state.relay.clone();
    let cancel = relay.cancellation_token();
    tokio::spawn(async move {
        let done = CancellationToken::new();
        let _done_guard = done.clone().drop_guard();
        spawn_disconnect_watch(tx.clone(), cancel.clone(), done);

        let mut sink = ChannelSink::new(tx);
        let outcome = relay
            .stream(
                &submission.prompt,
                &submission.context,
                submission.session_id.as_deref(),
                Some(cancel),
                &mut sink,
            )
            .await;
        if let Err(err) = outcome {
            sink.on_error(&err.to_string());
        }
    });

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event.to_sse(), rx))
    })
    .chain(stream::once(async { Event::default().data(DONE_MARKER) }))
    .map(Ok);

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Cancel `cancel` once the receiving side of `tx` is gone, unless `done`
/// fires first.
fn spawn_disconnect_watch(
    tx: mpsc::UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
    done: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            () = tx.closed() => {
                debug!("stream client disconnected");
                cancel.cancel();
            }
            () = done.cancelled() => {}
        }
    });
}

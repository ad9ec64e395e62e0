//! Router assembly and the HTTP listener.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{auth, handlers, AppState};
use crate::{AppError, Result};

/// Build the application router.
///
/// Everything under `/api/agent` except `/health` sits behind the API key
/// gate. Unknown paths get the JSON 404 envelope.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/requests", post(handlers::submit))
        .route(
            "/requests/{id}",
            get(handlers::get_request).delete(handlers::cancel_request),
        )
        .route("/stats", get(handlers::stats))
        .route("/stream", post(handlers::stream))
        .route(
            "/sessions/{id}/history",
            get(handlers::history).delete(handlers::clear_history),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_api_key,
        ))
        .route("/health", get(handlers::health));

    Router::new()
        .route("/", get(handlers::root))
        .nest("/api/agent", api)
        .fallback(handlers::not_found)
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Log method, path, status and duration of every request.
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        path,
        status = response.status().as_u16(),
        duration_ms = crate::executor::duration_millis(started.elapsed()),
        "request processed"
    );
    response
}

/// Bind the configured address and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` for an invalid bind address and
/// `AppError::Http` if binding or serving fails.
pub async fn serve_http(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind = state.config.bind_addr()?;
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {bind}: {err}")))?;
    serve_with_listener(listener, state, ct).await
}

/// Serve on an already-bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails.
pub async fn serve_with_listener(
    listener: TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Http(format!("listener has no address: {err}")))?;
    info!(%local, "starting HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")))?;

    info!("HTTP server shut down");
    Ok(())
}

//! HTTP boundary: JSON request/response API and the SSE stream endpoint.

pub mod auth;
pub mod events;
pub mod handlers;
pub mod server;

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::jobs::{JobService, StreamRelay};

pub use auth::ApiKeyGate;
pub use handlers::ApiError;
pub use server::{router, serve_http, serve_with_listener};

/// Shared state handed to every handler.
pub struct AppState {
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
    /// Polled job service.
    pub jobs: JobService,
    /// Streaming relay sharing the service's admission bound.
    pub relay: StreamRelay,
    /// API key check applied to protected routes.
    pub gate: ApiKeyGate,
}

impl AppState {
    /// Assemble state around an existing job service.
    #[must_use]
    pub fn new(config: Arc<GlobalConfig>, jobs: JobService, gate: ApiKeyGate) -> Self {
        let relay = jobs.relay();
        Self {
            config,
            jobs,
            relay,
            gate,
        }
    }
}

//! API key gate for protected routes.
//!
//! Clients present the key in the `x-api-key` header. Only a SHA-256
//! digest of the configured key is held in memory. A gate built without a
//! key lets every request through.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::handlers::ApiError;
use super::AppState;

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Digest-based API key check.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyGate {
    digest: Option<[u8; 32]>,
}

impl ApiKeyGate {
    /// Gate accepting exactly `key`; `None` or an empty key disables it.
    #[must_use]
    pub fn new(key: Option<&str>) -> Self {
        Self {
            digest: key.filter(|key| !key.is_empty()).map(digest),
        }
    }

    /// Gate that accepts every request.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether requests must present a key.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.digest.is_some()
    }

    /// Check a presented key.
    ///
    /// # Errors
    ///
    /// Returns a 401 [`ApiError`] with code `MISSING_API_KEY` or
    /// `INVALID_API_KEY`.
    pub fn verify(&self, presented: Option<&str>) -> Result<(), ApiError> {
        let Some(expected) = self.digest else {
            return Ok(());
        };

        let presented = presented
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(ApiError::missing_api_key)?;

        if digests_match(&expected, &digest(presented)) {
            Ok(())
        } else {
            Err(ApiError::invalid_api_key())
        }
    }
}

/// Middleware rejecting requests that fail the [`ApiKeyGate`].
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match state.gate.verify(presented) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            warn!(path = %request.uri().path(), code = err.code(), "rejected request");
            err.into_response()
        }
    }
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}

fn digests_match(left: &[u8; 32], right: &[u8; 32]) -> bool {
    left.iter()
        .zip(right.iter())
        .fold(0_u8, |acc, (l, r)| acc | (l ^ r))
        == 0
}

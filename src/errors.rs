//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Failures of an individual agent execution (spawn errors, timeouts,
/// non-zero exits) are not represented here: they are folded into the
/// request's response record as data. `AppError` covers the failures that
/// cross an API boundary, plus orchestration faults whose rendered message
/// becomes a failed record's error.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Caller input rejected before any work was scheduled.
    Validation(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Operation conflicts with the entity's current state.
    Conflict(String),
    /// Request registry could not serve the operation.
    Registry(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// HTTP transport failure.
    Http(String),
    /// Unexpected failure inside the orchestration layer.
    Internal(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Registry(msg) => write!(f, "registry: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

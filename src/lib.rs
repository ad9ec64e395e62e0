#![forbid(unsafe_code)]

//! `agent-dispatch`: runs prompts through an external command-line agent
//! behind a polling and streaming job API.

pub mod config;
pub mod errors;
pub mod executor;
pub mod http;
pub mod jobs;
pub mod models;
pub mod registry;
pub mod session;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};

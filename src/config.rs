//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::{AppError, Result};

/// Keychain service name used for the API key lookup.
const KEYRING_SERVICE: &str = "agent-dispatch";

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface the HTTP server binds to.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port for the HTTP server; 0 lets the OS pick one.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// How the prompt reaches the agent process.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PromptMode {
    /// Prompt is written to the child's stdin, which is then closed.
    #[default]
    Stdin,
    /// Prompt is passed as a launch argument.
    Argument,
}

/// External agent command line.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary (e.g. `qwen`, `node`, `claude`).
    pub command: String,
    /// Fixed arguments placed before any prompt-related arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Prompt delivery mode.
    #[serde(default)]
    pub prompt_mode: PromptMode,
    /// Flag preceding the prompt in argument mode; empty means positional.
    #[serde(default = "default_prompt_flag")]
    pub prompt_flag: String,
    /// Auto-approval flag appended to every launch; empty disables it.
    #[serde(default = "default_auto_approve_flag")]
    pub auto_approve_flag: String,
    /// Flag used to expose the working directory to the agent, if any.
    #[serde(default)]
    pub include_directories_flag: Option<String>,
    /// Whether the child inherits the server's full environment.
    #[serde(default = "default_true")]
    pub inherit_env: bool,
}

/// Execution timeouts in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Timeout applied when the caller does not override it.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Delay between the termination signal and a hard kill.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Smallest accepted caller override.
    #[serde(default = "default_min_timeout_ms")]
    pub min_timeout_ms: u64,
    /// Largest accepted caller override.
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            min_timeout_ms: default_min_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Default execution timeout.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Grace period between SIGTERM and a hard kill.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Admission and input limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LimitsConfig {
    /// Maximum prompt length in characters.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
    /// Maximum number of agent processes running at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_prompt_chars: default_max_prompt_chars(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
        }
    }
}

/// Registry retention policy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetentionConfig {
    /// Age after which terminal records become eligible for eviction.
    #[serde(default = "default_max_age_seconds")]
    pub max_age_seconds: u64,
    /// Interval between eviction sweeps.
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_seconds: default_max_age_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl RetentionConfig {
    /// Age threshold as a [`Duration`].
    #[must_use]
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_seconds)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Conversation history settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Number of most recent entries rendered into an augmented prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Cap on stored entries per session; absent means unbounded.
    #[serde(default)]
    pub max_stored_entries: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_stored_entries: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

fn default_prompt_flag() -> String {
    "--prompt".into()
}

fn default_auto_approve_flag() -> String {
    "--yolo".into()
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_kill_grace_ms() -> u64 {
    5_000
}

fn default_min_timeout_ms() -> u64 {
    1_000
}

fn default_max_timeout_ms() -> u64 {
    600_000
}

fn default_max_prompt_chars() -> usize {
    10_000
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_max_age_seconds() -> u64 {
    3600
}

fn default_sweep_interval_seconds() -> u64 {
    3600
}

fn default_history_window() -> usize {
    6
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// External agent command line.
    pub agent: AgentConfig,
    /// Execution timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Admission and input limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Registry retention policy.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Conversation history settings.
    #[serde(default)]
    pub session: SessionConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `AGENT_DISPATCH_PORT`, `AGENT_CLI_PATH` and
    /// `AGENT_TIMEOUT_MS` onto the parsed file, then re-validate.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an override is malformed or the
    /// resulting configuration is invalid.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(port) = env::var("AGENT_DISPATCH_PORT") {
            self.server.port = port
                .parse()
                .map_err(|err| AppError::Config(format!("AGENT_DISPATCH_PORT invalid: {err}")))?;
            info!(port = self.server.port, "port overridden from environment");
        }

        if let Ok(command) = env::var("AGENT_CLI_PATH") {
            info!(command = %command, "agent command overridden from environment");
            self.agent.command = command;
        }

        if let Ok(timeout) = env::var("AGENT_TIMEOUT_MS") {
            self.timeouts.default_timeout_ms = timeout
                .parse()
                .map_err(|err| AppError::Config(format!("AGENT_TIMEOUT_MS invalid: {err}")))?;
            info!(
                timeout_ms = self.timeouts.default_timeout_ms,
                "default timeout overridden from environment"
            );
        }

        self.validate()
    }

    /// Socket address the HTTP server binds to.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `server.host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .server
            .host
            .parse()
            .map_err(|err| AppError::Config(format!("server.host invalid: {err}")))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Check whether a caller-supplied timeout override is acceptable.
    #[must_use]
    pub fn timeout_in_bounds(&self, timeout_ms: u64) -> bool {
        (self.timeouts.min_timeout_ms..=self.timeouts.max_timeout_ms).contains(&timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.limits.max_concurrent_jobs == 0 {
            return Err(AppError::Config(
                "max_concurrent_jobs must be greater than zero".into(),
            ));
        }

        if self.limits.max_prompt_chars == 0 {
            return Err(AppError::Config(
                "max_prompt_chars must be greater than zero".into(),
            ));
        }

        if self.retention.sweep_interval_seconds == 0 {
            return Err(AppError::Config(
                "sweep_interval_seconds must be greater than zero".into(),
            ));
        }

        if self.session.history_window == 0 {
            return Err(AppError::Config(
                "history_window must be greater than zero".into(),
            ));
        }

        let timeouts = &self.timeouts;
        if timeouts.min_timeout_ms > timeouts.max_timeout_ms {
            return Err(AppError::Config(format!(
                "min_timeout_ms ({}) exceeds max_timeout_ms ({})",
                timeouts.min_timeout_ms, timeouts.max_timeout_ms
            )));
        }

        if !self.timeout_in_bounds(timeouts.default_timeout_ms) {
            return Err(AppError::Config(format!(
                "default_timeout_ms ({}) outside [{}, {}]",
                timeouts.default_timeout_ms, timeouts.min_timeout_ms, timeouts.max_timeout_ms
            )));
        }

        Ok(())
    }
}

/// Load the API key from the OS keychain with env-var fallback.
///
/// Tries the `agent-dispatch` keyring service first, then falls back to
/// the `AGENT_DISPATCH_API_KEY` environment variable. Returns `None` when
/// neither source provides a key, which leaves the HTTP gate open.
///
/// # Errors
///
/// Returns `AppError::Config` if the keychain lookup task panics.
pub async fn load_api_key() -> Result<Option<String>> {
    let keychain_result = tokio::task::spawn_blocking(|| {
        keyring::Entry::new(KEYRING_SERVICE, "api_key").and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!("keychain api_key entry is empty, trying env var");
        }
        Err(err) => {
            warn!(?err, "keychain lookup failed, trying env var");
        }
    }

    Ok(env::var("AGENT_DISPATCH_API_KEY")
        .ok()
        .filter(|value| !value.is_empty()))
}

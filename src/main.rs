#![forbid(unsafe_code)]

//! `agent-dispatch`: job server binary.
//!
//! Bootstraps configuration, the eviction sweeper and the HTTP API, then
//! drains in-flight jobs on shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_dispatch::config::{load_api_key, GlobalConfig};
use agent_dispatch::http::{self, ApiKeyGate, AppState};
use agent_dispatch::jobs::JobService;
use agent_dispatch::registry;
use agent_dispatch::{AppError, Result};

/// Time in-flight jobs get to stop after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-dispatch", about = "Agent job server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the listening port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-dispatch server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    config.apply_env_overrides()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let api_key = load_api_key().await?;
    if api_key.is_none() {
        warn!("no API key configured; protected routes are open");
    }
    let gate = ApiKeyGate::new(api_key.as_deref());

    let config = Arc::new(config);
    info!(
        command = %config.agent.command,
        max_concurrent_jobs = config.limits.max_concurrent_jobs,
        "configuration loaded"
    );

    // ── Build shared application state ──────────────────
    let jobs = JobService::from_config(&config);
    let state = Arc::new(AppState::new(Arc::clone(&config), jobs.clone(), gate));

    // ── Start eviction sweeper ──────────────────────────
    let ct = CancellationToken::new();
    let sweeper_handle = registry::spawn_eviction_task(
        Arc::clone(jobs.registry()),
        config.retention.max_age(),
        config.retention.sweep_interval(),
        ct.clone(),
    );
    info!("eviction sweeper started");

    // ── Start HTTP server ───────────────────────────────
    let http_ct = ct.clone();
    let http_state = Arc::clone(&state);
    let http_handle = tokio::spawn(async move {
        if let Err(err) = http::serve_http(http_state, http_ct).await {
            error!(%err, "http server failed");
        }
    });

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if !jobs.shutdown(SHUTDOWN_GRACE).await {
        warn!("some jobs were still running at exit");
    }

    // ── Wait for background tasks ───────────────────────
    let _ = tokio::join!(http_handle, sweeper_handle);
    info!("agent-dispatch shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

//! Background job submission with admission control and supervision.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::relay::StreamRelay;
use super::{terminal_update, Submission, SubmissionLimits, CANCELLED_BEFORE_START};
use crate::config::GlobalConfig;
use crate::executor::{AgentRunner, ExecOptions, ProcessRunner};
use crate::models::request::AgentRequest;
use crate::models::response::{AgentResponse, StatusUpdate};
use crate::models::stats::QueueStats;
use crate::registry::RequestRegistry;
use crate::session::SessionStore;
use crate::{AppError, Result};

/// Poll interval while waiting for in-flight jobs during shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

struct Shared {
    runner: Arc<dyn AgentRunner>,
    registry: Arc<RequestRegistry>,
    sessions: Arc<SessionStore>,
    permits: Arc<Semaphore>,
    limits: SubmissionLimits,
    inflight: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

/// Orchestration boundary for polled jobs.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct JobService {
    shared: Arc<Shared>,
}

impl JobService {
    /// Assemble a service from its collaborators.
    ///
    /// `max_concurrent` bounds the number of agent processes running at
    /// once, across both polled jobs and streams from [`Self::relay`].
    #[must_use]
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        registry: Arc<RequestRegistry>,
        sessions: Arc<SessionStore>,
        limits: SubmissionLimits,
        max_concurrent: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                runner,
                registry,
                sessions,
                permits: Arc::new(Semaphore::new(max_concurrent)),
                limits,
                inflight: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Build the production service: a [`ProcessRunner`], a fresh registry
    /// and a session store, all configured from `config`.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(
            Arc::new(ProcessRunner::from_config(config)),
            Arc::new(RequestRegistry::new()),
            Arc::new(SessionStore::from_config(&config.session)),
            SubmissionLimits::from_config(config),
            config.limits.max_concurrent_jobs,
        )
    }

    /// Stream relay sharing this service's runner, sessions, admission
    /// semaphore and shutdown signal.
    #[must_use]
    pub fn relay(&self) -> StreamRelay {
        StreamRelay::new(
            Arc::clone(&self.shared.runner),
            Arc::clone(&self.shared.sessions),
            Arc::clone(&self.shared.permits),
            self.shared.limits,
            self.shared.shutdown.clone(),
        )
    }

    /// Shared request registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.shared.registry
    }

    /// Shared session store.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.shared.sessions
    }

    /// Validate a submission without scheduling it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` when the prompt, timeout override or
    /// session id is unacceptable.
    pub fn validate(&self, submission: &Submission) -> Result<()> {
        self.shared.limits.validate(
            &submission.prompt,
            &submission.context,
            submission.session_id.as_deref(),
        )
    }

    /// Accept a submission and schedule it in the background.
    ///
    /// Returns the `pending` record immediately; the execution is never
    /// awaited here. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for rejected input (no record is
    /// created) and `AppError::Conflict` if the generated id collides.
    pub fn submit(&self, submission: Submission) -> Result<AgentResponse> {
        self.validate(&submission)?;

        let request = AgentRequest::new(
            submission.prompt,
            submission.context,
            submission.metadata,
            submission.session_id,
        );
        let response = self.shared.registry.create(&request)?;
        let request_id = request.id.clone();

        let token = self.shared.shutdown.child_token();
        self.shared
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.clone(), token.clone());

        let span = info_span!("job", request_id = %request_id);
        let job = tokio::spawn(
            run_job(Arc::clone(&self.shared), request, token).instrument(span.clone()),
        );
        tokio::spawn(
            supervise(Arc::clone(&self.shared), request_id, job).instrument(span.clone()),
        );

        span.in_scope(|| info!("request accepted"));
        Ok(response)
    }

    /// Current record for `request_id`, or `None` if it was never
    /// submitted (or has been evicted).
    #[must_use]
    pub fn status(&self, request_id: &str) -> Option<AgentResponse> {
        self.shared.registry.get(request_id)
    }

    /// Current counter snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if the registry cannot produce stats.
    pub fn stats(&self) -> Result<QueueStats> {
        self.shared.registry.stats()
    }

    /// Request cancellation of a queued or running job.
    ///
    /// The returned record is the state at the time of the call; the
    /// terminal `failed` state follows once the process has stopped.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id and
    /// `AppError::Conflict` if the job already finished.
    pub fn cancel(&self, request_id: &str) -> Result<AgentResponse> {
        let current = self
            .shared
            .registry
            .get(request_id)
            .ok_or_else(|| AppError::NotFound(format!("request {request_id}")))?;

        if current.is_terminal() {
            return Err(AppError::Conflict(format!(
                "request {request_id} is already {}",
                current.status.as_str()
            )));
        }

        let token = self
            .shared
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request_id)
            .cloned();

        match token {
            Some(token) => {
                token.cancel();
                info!(request_id, "cancellation requested");
                Ok(current)
            }
            None => Err(AppError::Conflict(format!(
                "request {request_id} is no longer running"
            ))),
        }
    }

    /// Cancel every in-flight job and wait up to `grace` for them to reach
    /// a terminal state.
    ///
    /// Returns `true` when no job is left active.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.shared.shutdown.cancel();
        let deadline = Instant::now() + grace;

        loop {
            let active = self.stats().map_or(0, |stats| stats.active);
            if active == 0 {
                info!("all jobs finished");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(active, "shutdown grace elapsed with jobs still active");
                return false;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
    }
}

/// Wait for admission, run the agent and produce the terminal update.
async fn run_job(
    shared: Arc<Shared>,
    request: AgentRequest,
    token: CancellationToken,
) -> StatusUpdate {
    let queued = Instant::now();

    let permit = tokio::select! {
        biased;
        () = token.cancelled() => {
            info!("cancelled while queued");
            return StatusUpdate::failed(CANCELLED_BEFORE_START, queued.elapsed());
        }
        permit = Arc::clone(&shared.permits).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(err) => {
                error!(%err, "admission semaphore closed");
                return StatusUpdate::failed(
                    AppError::Internal(err.to_string()).to_string(),
                    queued.elapsed(),
                );
            }
        },
    };

    if let Err(err) = shared.registry.transition(&request.id, StatusUpdate::processing()) {
        warn!(%err, "could not mark request processing");
    }

    let prompt = match request.session_id.as_deref() {
        Some(session_id) => shared.sessions.augment(session_id, &request.prompt).await,
        None => request.prompt.clone(),
    };

    let options = ExecOptions::from_context(&request.context).with_cancel(token);
    let result = shared.runner.execute(&prompt, &options).await;
    drop(permit);

    if result.is_completed() {
        if let Some(session_id) = request.session_id.as_deref() {
            let output = result.output.as_deref().unwrap_or_default();
            shared
                .sessions
                .record_exchange(session_id, &request.prompt, output)
                .await;
        }
    }

    terminal_update(result)
}

/// Await the job task and write its terminal state, whatever happened to it.
async fn supervise(shared: Arc<Shared>, request_id: String, job: JoinHandle<StatusUpdate>) {
    let started = Instant::now();
    let update = match job.await {
        Ok(update) => update,
        Err(err) => {
            error!(%err, "job task did not complete");
            StatusUpdate::failed(
                AppError::Internal(err.to_string()).to_string(),
                started.elapsed(),
            )
        }
    };

    match shared.registry.transition(&request_id, update) {
        Ok(response) => info!(
            status = response.status.as_str(),
            execution_time_ms = response.execution_time_ms.unwrap_or_default(),
            "request finished"
        ),
        Err(err) => error!(%err, "failed to record terminal state"),
    }

    shared
        .inflight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&request_id);
}

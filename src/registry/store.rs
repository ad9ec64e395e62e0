//! Concurrency-safe map of request id to lifecycle record.
//!
//! Entries and counters live under one [`RwLock`], so a transition and its
//! counter reclassification are observed together. Readers clone the record
//! they look up and never see a half-applied update.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::executor::duration_millis;
use crate::models::request::AgentRequest;
use crate::models::response::{AgentResponse, ResponseStatus, StatusUpdate};
use crate::models::stats::QueueStats;
use crate::{AppError, Result};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, AgentResponse>,
    stats: QueueStats,
}

/// Store of [`AgentResponse`] records keyed by request id.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    inner: RwLock<Inner>,
}

impl RequestRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a `pending` record for `request`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if a record with the same id exists.
    pub fn create(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let mut inner = self.write();
        if inner.entries.contains_key(&request.id) {
            return Err(AppError::Conflict(format!(
                "request {} already registered",
                request.id
            )));
        }

        let response = AgentResponse::pending(request);
        inner.entries.insert(request.id.clone(), response.clone());
        inner.stats.active += 1;
        inner.stats.waiting += 1;
        debug!(request_id = %request.id, "registered request");
        Ok(response)
    }

    /// Apply `update` to the record for `request_id`.
    ///
    /// Output is kept only on `completed` and error only on `failed`.
    /// Terminal transitions stamp `completed_at` (now, unless supplied).
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown id and
    /// `AppError::Conflict` when the record is already terminal or the
    /// status change is not a legal edge.
    pub fn transition(&self, request_id: &str, update: StatusUpdate) -> Result<AgentResponse> {
        let mut guard = self.write();
        let inner = &mut *guard;
        let entry = inner
            .entries
            .get_mut(request_id)
            .ok_or_else(|| AppError::NotFound(format!("request {request_id}")))?;

        let previous = entry.status;
        if previous.is_terminal() {
            return Err(AppError::Conflict(format!(
                "request {request_id} is already {}",
                previous.as_str()
            )));
        }
        if !previous.can_transition_to(update.status) {
            return Err(AppError::Conflict(format!(
                "request {request_id} cannot move from {} to {}",
                previous.as_str(),
                update.status.as_str()
            )));
        }

        entry.status = update.status;
        if previous == ResponseStatus::Pending {
            inner.stats.waiting = inner.stats.waiting.saturating_sub(1);
        }

        match update.status {
            ResponseStatus::Completed => {
                entry.output = update.output;
                inner.stats.completed += 1;
            }
            ResponseStatus::Failed => {
                entry.error = update.error;
                inner.stats.failed += 1;
            }
            ResponseStatus::Pending | ResponseStatus::Processing => {}
        }

        if update.status.is_terminal() {
            inner.stats.active = inner.stats.active.saturating_sub(1);
            entry.completed_at = Some(update.completed_at.unwrap_or_else(Utc::now));
            entry.execution_time_ms = Some(update.execution_time.map_or(0, duration_millis));
        }

        debug!(
            request_id,
            from = previous.as_str(),
            to = update.status.as_str(),
            "request transitioned"
        );
        Ok(entry.clone())
    }

    /// Snapshot of the record for `request_id`, if it exists.
    #[must_use]
    pub fn get(&self, request_id: &str) -> Option<AgentResponse> {
        self.read().entries.get(request_id).cloned()
    }

    /// Current counter snapshot.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Registry` if a writer panicked while holding the
    /// lock; the health check reports this as unhealthy.
    pub fn stats(&self) -> Result<QueueStats> {
        self.inner
            .read()
            .map(|inner| inner.stats)
            .map_err(|_| AppError::Registry("registry lock poisoned".into()))
    }

    /// Remove terminal records created more than `max_age` ago.
    ///
    /// Returns the number of records removed.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        match chrono::Duration::from_std(max_age) {
            Ok(age) => self.evict_created_before(Utc::now() - age),
            Err(_) => 0,
        }
    }

    /// Remove terminal records created before `cutoff`.
    ///
    /// Non-terminal records are never removed. Cumulative counters are not
    /// affected.
    pub fn evict_created_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.write();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, entry| !(entry.is_terminal() && entry.created_at < cutoff));
        let removed = before - inner.entries.len();
        if removed > 0 {
            info!(removed, remaining = inner.entries.len(), "evicted expired requests");
        }
        removed
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether the registry holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Poison the lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.write();
            panic!("writer panicked while holding the registry lock");
        }));
        assert!(outcome.is_err());
    }
}

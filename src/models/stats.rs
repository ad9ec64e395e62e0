//! Queue statistics snapshot.

use serde::{Deserialize, Serialize};

/// Point-in-time aggregate over all response records.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Accepted requests still waiting for an execution slot.
    pub waiting: u64,
    /// Requests not yet terminal (waiting plus running).
    pub active: u64,
    /// Requests that completed successfully since startup.
    pub completed: u64,
    /// Requests that failed since startup.
    pub failed: u64,
}

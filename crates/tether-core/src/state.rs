//! Shared sync-state types.

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of the sync subsystem, re-derived from the queue
/// and network monitor on request. Only `last_sync_time` is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Current connectivity as reported by the network monitor
    pub is_online: bool,
    /// Whether a drain is currently running
    pub is_syncing: bool,
    /// Number of mutations still queued
    pub pending_count: usize,
    /// Completion time of the last drain (Unix ms)
    pub last_sync_time: Option<i64>,
    /// Message from the last cycle that ended with unresolved failures
    pub last_sync_error: Option<String>,
}

/// Events published on the sync event bus for UI indicators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A drain started
    Started,
    /// A drain finished; `remaining` counts items left queued
    Completed { synced: usize, remaining: usize },
    /// A drain ended with unresolved failures
    Error { message: String },
}

//! Conflict models

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a divergent record pair should be combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Take the server version verbatim
    ServerWins,
    /// Take the local version verbatim
    LocalWins,
    /// Field-wise structural merge; clashes fall back to the server value
    Merge,
    /// Defer entirely to the user
    UserChoice,
}

/// A divergence detected between a locally-changed record and an
/// independently server-changed record, built transiently during a drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictItem {
    /// Record id
    pub id: String,
    /// Table the record belongs to
    pub table: String,
    /// Local version of the record
    pub local: Value,
    /// Server version of the record
    pub server: Value,
    /// Last server-observed version, when one was recorded; the common
    /// base for three-way merging
    pub last_synced: Option<Value>,
    /// Local version's update timestamp (Unix ms)
    pub local_updated_at: i64,
    /// Server version's update timestamp (Unix ms)
    pub server_updated_at: i64,
}

/// Outcome of resolving a single conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Record id the resolution applies to
    pub id: String,
    /// Strategy that produced this resolution
    pub strategy: MergeStrategy,
    /// The value to write back; absent when the user must choose
    pub resolved: Option<Value>,
    /// When true the resolution must not be auto-applied
    pub requires_user_action: bool,
    /// Human-readable explanation (conflicting field paths, or both raw
    /// versions for user inspection)
    pub reason: Option<String>,
}

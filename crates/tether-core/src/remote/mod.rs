//! Remote canonical service seam
//!
//! The engine only ever talks to the server through [`RemoteService`];
//! transport and query syntax live behind it. Failures carry their retry
//! class: transient failures are replayed on the next cycle, rejections
//! can never succeed and cause the mutation to be dropped.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

mod http;
mod memory;

pub use http::HttpRemote;
pub use memory::InMemoryRemote;

/// Remote operation failure, classed by retryability
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Network error, timeout, or server-side unavailability; safe to retry
    #[error("Transient remote failure: {0}")]
    Transient(String),

    /// The service rejected the payload outright; retrying cannot succeed
    #[error("Remote rejected mutation: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether replaying the same call may succeed later
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for remote operations
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Per-table CRUD surface of the remote canonical service.
///
/// Successful writes return the server's resulting record, which refreshes
/// the client's last-observed version.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Create a record
    async fn insert(&self, table: &str, record: &Value) -> RemoteResult<Value>;

    /// Replace a record's fields
    async fn update(&self, table: &str, id: &str, record: &Value) -> RemoteResult<Value>;

    /// Delete a record
    async fn delete(&self, table: &str, id: &str) -> RemoteResult<()>;

    /// Fetch the current server record, or `None` when absent
    async fn fetch(&self, table: &str, id: &str) -> RemoteResult<Option<Value>>;
}

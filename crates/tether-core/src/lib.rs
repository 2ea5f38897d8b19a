//! tether-core - Offline-first sync engine
//!
//! A durable local store, an ordered queue of pending mutations, and the
//! drain/merge cycle that reconciles local and server state once
//! connectivity returns. Writes made offline are never silently lost,
//! never replayed twice, and divergent edits merge deterministically.

pub mod config;
pub mod error;
pub mod manager;
pub mod models;
pub mod monitor;
pub mod queue;
pub mod remote;
pub mod resolver;
pub mod scheduler;
pub mod state;
pub mod store;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use manager::SyncManager;
pub use models::{ConflictItem, ConflictResolution, MergeStrategy, QueueAction, QueueItem};
pub use monitor::NetworkMonitor;
pub use queue::SyncQueue;
pub use remote::{RemoteError, RemoteService};
pub use state::{SyncEvent, SyncState};
pub use store::{Database, LocalStore};

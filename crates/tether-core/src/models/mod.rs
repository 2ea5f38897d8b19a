//! Data models for Tether

mod conflict;
mod queue;

pub use conflict::{ConflictItem, ConflictResolution, MergeStrategy};
pub use queue::{QueueAction, QueueItem};

//! Sync engine configuration

use std::time::Duration;

use crate::models::MergeStrategy;

/// Configuration for the sync manager
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Periodic drain interval while online with a non-empty queue
    /// (`None` disables the timer; connectivity and explicit triggers
    /// still apply)
    pub sync_interval: Option<Duration>,
    /// Transient-failure ceiling before a mutation is dropped as
    /// permanently unrecoverable
    pub max_attempts: u32,
    /// Strategy applied when a drain detects a conflict
    pub default_strategy: MergeStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Some(Duration::from_secs(60)),
            max_attempts: 5,
            default_strategy: MergeStrategy::Merge,
        }
    }
}

impl SyncConfig {
    /// Set the periodic drain interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disable the periodic drain timer (triggered sync only)
    #[must_use]
    pub const fn without_periodic_sync(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    /// Set the transient-failure retry ceiling
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the default conflict strategy
    #[must_use]
    pub const fn with_default_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }
}

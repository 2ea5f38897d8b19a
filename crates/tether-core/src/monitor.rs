//! Network connectivity monitor
//!
//! Thin wrapper around the platform's connectivity signal. The monitor
//! only reports state; acting on a transition (triggering a sync) is the
//! sync manager's job, wired up via [`NetworkMonitor::subscribe`].

use tokio::sync::watch;

/// Observable online/offline state
#[derive(Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Create a monitor with the given starting state
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx }
    }

    /// Current connectivity
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Feed a connectivity change from the platform signal.
    ///
    /// Repeated reports of the current state are dropped, so subscribers
    /// only wake on real transitions.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "Connectivity changed");
        }
    }

    /// Subscribe to connectivity transitions
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for NetworkMonitor {
    /// Starts offline; the platform signal reports the real state
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reports_current_state() {
        let monitor = NetworkMonitor::new(true);
        assert!(monitor.is_online());
        monitor.set_online(false);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_wake_only_on_transitions() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(false);
        assert!(!rx.has_changed().unwrap());

        monitor.set_online(true);
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());
    }
}

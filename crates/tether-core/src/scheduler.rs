//! Cancellable background tasks
//!
//! Timer- and event-driven triggers run as explicitly owned tasks with a
//! cancel handle, so a teardown (or a reconnect) can stop a pending timer
//! instead of racing it.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a spawned background task; dropping does not cancel, call
/// [`ScheduledTask::cancel`]
pub struct ScheduledTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn a task that receives a cancellation signal
    pub fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, cancelled) = watch::channel(false);
        let handle = tokio::spawn(task(cancelled));
        Self { cancel, handle }
    }

    /// Spawn a task running `tick` every `period` until cancelled
    pub fn every<F, Fut>(period: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn(move |mut cancelled| async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval fires immediately; skip the zeroth tick
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => tick().await,
                    _ = cancelled.changed() => break,
                }
            }
        })
    }

    /// Signal cancellation and detach
    pub fn cancel(self) {
        let _ = self.cancel.send(true);
        self.handle.abort();
    }
}

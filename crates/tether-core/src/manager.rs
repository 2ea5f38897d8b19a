//! Sync orchestration
//!
//! Owns the drain cycle: on a trigger (regained connectivity, explicit
//! call, or the periodic timer) pending mutations are replayed against the
//! remote service sequentially, in enqueue order. Divergent records go
//! through the conflict resolver; transient failures stay queued for the
//! next cycle. A single drain runs at a time; triggers arriving mid-run
//! are coalesced into one follow-up run.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::broadcast;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::{ConflictItem, ConflictResolution, MergeStrategy, QueueAction, QueueItem};
use crate::monitor::NetworkMonitor;
use crate::queue::SyncQueue;
use crate::remote::{RemoteError, RemoteService};
use crate::resolver;
use crate::scheduler::ScheduledTask;
use crate::state::{SyncEvent, SyncState};
use crate::store::{self, LocalStore, META_LAST_SYNC_TIME};

/// Capacity of the sync event bus; slow consumers lag rather than block
const EVENT_BUS_CAPACITY: usize = 64;

#[derive(Default)]
struct RunState {
    is_syncing: bool,
    rerun_requested: bool,
    last_sync_error: Option<String>,
}

/// Outcome of replaying one queue item
enum ItemOutcome {
    /// Remote apply succeeded; item removed
    Applied,
    /// Needs user resolution; item left queued and marked
    Conflicted(String),
    /// Transient failure; item left queued for the next cycle
    Deferred,
    /// Permanently unrecoverable; item removed and logged
    Dropped(String),
}

/// Per-item failure, classed so the drain loop can decide retry vs abort
enum ApplyError {
    Remote(RemoteError),
    Storage(Error),
}

impl From<RemoteError> for ApplyError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err)
    }
}

impl From<Error> for ApplyError {
    fn from(err: Error) -> Self {
        Self::Storage(err)
    }
}

struct DrainReport {
    synced: usize,
    failures: Vec<String>,
}

/// The sync engine's orchestrator.
///
/// Constructed once at the application's composition root; call
/// [`SyncManager::start`] on launch and [`SyncManager::shutdown`] before
/// exit.
pub struct SyncManager {
    store: LocalStore,
    queue: SyncQueue,
    monitor: NetworkMonitor,
    remote: Arc<dyn RemoteService>,
    config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
    run: Mutex<RunState>,
    tasks: Mutex<Vec<ScheduledTask>>,
}

impl SyncManager {
    /// Create a manager over an open store and queue
    pub fn new(
        store: LocalStore,
        queue: SyncQueue,
        monitor: NetworkMonitor,
        remote: Arc<dyn RemoteService>,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            store,
            queue,
            monitor,
            remote,
            config,
            events,
            run: Mutex::new(RunState::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to sync lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The local store this manager drains into
    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// The pending-mutation queue
    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    /// The connectivity monitor
    pub const fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    /// Current snapshot of the sync subsystem
    pub fn sync_state(&self) -> Result<SyncState> {
        let (is_syncing, last_sync_error) = {
            let run = self.run_state()?;
            (run.is_syncing, run.last_sync_error.clone())
        };
        Ok(SyncState {
            is_online: self.monitor.is_online(),
            is_syncing,
            pending_count: self.queue.len()?,
            last_sync_time: self
                .store
                .meta(META_LAST_SYNC_TIME)?
                .and_then(|value| value.parse().ok()),
            last_sync_error,
        })
    }

    /// Apply a mutation locally and enqueue it for replay.
    ///
    /// The optimistic store write and the queue entry land in one
    /// transaction; storage failure leaves neither behind and propagates
    /// to the caller.
    pub fn stage(&self, table: &str, action: QueueAction, data: Value) -> Result<QueueItem> {
        let record_id = store::record_id(&data)?.to_string();
        let item = QueueItem::new(table, action, record_id, data);
        self.store.apply_mutation(&item)?;
        Ok(item)
    }

    /// Spawn the connectivity watcher and the periodic drain timer
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self
            .tasks
            .lock()
            .map_err(|_| Error::Storage("task list mutex poisoned".into()))?;

        let manager = Arc::clone(self);
        let mut transitions = self.monitor.subscribe();
        tasks.push(ScheduledTask::spawn(move |mut cancelled| async move {
            loop {
                tokio::select! {
                    changed = transitions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *transitions.borrow_and_update();
                        if online {
                            tracing::info!("Connectivity regained; triggering sync");
                            if let Err(error) = manager.trigger_sync().await {
                                tracing::error!(%error, "Reconnect sync failed");
                            }
                        }
                    }
                    _ = cancelled.changed() => break,
                }
            }
        }));

        if let Some(period) = self.config.sync_interval {
            let manager = Arc::clone(self);
            tasks.push(ScheduledTask::every(period, move || {
                let manager = Arc::clone(&manager);
                async move {
                    let pending = manager.queue.len().unwrap_or(0);
                    if manager.monitor.is_online() && pending > 0 {
                        tracing::debug!(pending, "Periodic sync tick");
                        if let Err(error) = manager.trigger_sync().await {
                            tracing::error!(%error, "Periodic sync failed");
                        }
                    }
                }
            }));
        }

        Ok(())
    }

    /// Cancel background tasks; pending mutations stay durably queued
    pub fn shutdown(&self) {
        let tasks = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for task in tasks {
            task.cancel();
        }
    }

    /// Request a drain of the sync queue.
    ///
    /// The single entry point for all triggers. If a drain is already
    /// running the request is coalesced: at most one follow-up run starts
    /// after the current one completes.
    pub async fn trigger_sync(&self) -> Result<()> {
        {
            let mut run = self.run_state()?;
            if run.is_syncing {
                run.rerun_requested = true;
                tracing::debug!("Drain in progress; trigger coalesced");
                return Ok(());
            }
            run.is_syncing = true;
        }

        let mut result = Ok(());
        loop {
            let report = self.drain().await;

            let mut run = self.run_state()?;
            match report {
                Ok(report) => {
                    run.last_sync_error = if report.failures.is_empty() {
                        None
                    } else {
                        Some(report.failures.join("; "))
                    };
                }
                Err(error) => {
                    let message = error.to_string();
                    run.last_sync_error = Some(message.clone());
                    let _ = self.events.send(SyncEvent::Error { message });
                    result = Err(error);
                }
            }

            if result.is_ok() && run.rerun_requested && self.monitor.is_online() {
                run.rerun_requested = false;
                drop(run);
                continue;
            }
            run.rerun_requested = false;
            run.is_syncing = false;
            break;
        }

        result
    }

    /// Re-resolve a conflicted queue item with a caller-chosen strategy
    /// and apply the result.
    ///
    /// `UserChoice` is not applicable here (it produces no value to
    /// apply), and delete conflicts only accept a side, not a merge.
    pub async fn resolve_conflicted(
        &self,
        item_id: &str,
        strategy: MergeStrategy,
    ) -> Result<ConflictResolution> {
        if strategy == MergeStrategy::UserChoice {
            return Err(Error::InvalidInput(
                "user-choice produces no resolved value to apply".into(),
            ));
        }

        let item = self
            .queue
            .get(item_id)?
            .ok_or_else(|| Error::NotFound(format!("queue item {item_id}")))?;

        if item.action == QueueAction::Delete && strategy == MergeStrategy::Merge {
            return Err(Error::InvalidInput(
                "delete conflicts accept server-wins or local-wins only".into(),
            ));
        }

        let server = self.remote.fetch(&item.table, &item.record_id).await?;
        let shadow = self.store.shadow(&item.table, &item.record_id)?;
        let conflict = build_conflict(&item, server.unwrap_or(Value::Null), shadow);
        let resolution = resolver::resolve_conflict(&conflict, strategy);

        if resolution.requires_user_action {
            return Ok(resolution);
        }

        match (item.action, strategy) {
            (QueueAction::Delete, MergeStrategy::LocalWins) => {
                self.remote.delete(&item.table, &item.record_id).await?;
                self.store.remove_shadow(&item.table, &item.record_id)?;
                self.queue.remove(&item.id)?;
            }
            (QueueAction::Delete, _) => {
                // Delete cancelled: adopt the server version locally
                if let Some(resolved) = resolution.resolved.as_ref().filter(|v| !v.is_null()) {
                    self.store.put_raw(&item.table, resolved)?;
                    self.store
                        .put_shadow(&item.table, &item.record_id, resolved)?;
                }
                self.queue.remove(&item.id)?;
            }
            (_, MergeStrategy::ServerWins) => {
                if let Some(resolved) = resolution.resolved.as_ref().filter(|v| !v.is_null()) {
                    self.store.put_raw(&item.table, resolved)?;
                    self.store
                        .put_shadow(&item.table, &item.record_id, resolved)?;
                } else {
                    // Server side is gone; honor it locally
                    self.store.remove(&item.table, &item.record_id)?;
                    self.store.remove_shadow(&item.table, &item.record_id)?;
                }
                self.queue.remove(&item.id)?;
            }
            _ => {
                let resolved = resolution
                    .resolved
                    .clone()
                    .ok_or_else(|| Error::InvalidInput("resolution carries no value".into()))?;
                let server_record = self
                    .remote
                    .update(&item.table, &item.record_id, &resolved)
                    .await?;
                self.store.put_raw(&item.table, &server_record)?;
                self.store
                    .put_shadow(&item.table, &item.record_id, &server_record)?;
                self.queue.remove(&item.id)?;
            }
        }

        tracing::info!(
            table = %item.table,
            record_id = %item.record_id,
            strategy = ?strategy,
            "Conflicted mutation resolved by caller"
        );
        Ok(resolution)
    }

    fn run_state(&self) -> Result<MutexGuard<'_, RunState>> {
        self.run
            .lock()
            .map_err(|_| Error::Storage("sync run-state mutex poisoned".into()))
    }

    /// One pass over the queue, sequential, in enqueue order
    async fn drain(&self) -> Result<DrainReport> {
        if !self.monitor.is_online() {
            tracing::debug!("Offline; drain skipped");
            return Ok(DrainReport {
                synced: 0,
                failures: Vec::new(),
            });
        }

        let _ = self.events.send(SyncEvent::Started);
        let items = self.queue.all()?;
        tracing::info!(pending = items.len(), "Draining sync queue");

        let mut synced = 0;
        let mut failures = Vec::new();
        // Tables whose head-of-line item stayed queued this pass. Later
        // mutations to the same table must wait for it, or a replay on the
        // next cycle would land out of order.
        let mut blocked_tables = HashSet::new();

        for item in items {
            if !self.monitor.is_online() {
                // Leave the remainder safely queued
                tracing::info!("Connectivity lost mid-drain; stopping after current item");
                break;
            }
            if blocked_tables.contains(&item.table) {
                tracing::debug!(
                    table = %item.table,
                    record_id = %item.record_id,
                    "Earlier mutation for this table is still queued; holding"
                );
                continue;
            }

            match self.apply_item(&item).await? {
                ItemOutcome::Applied => synced += 1,
                ItemOutcome::Deferred => {
                    blocked_tables.insert(item.table.clone());
                }
                ItemOutcome::Conflicted(reason) => {
                    blocked_tables.insert(item.table.clone());
                    failures.push(reason);
                }
                ItemOutcome::Dropped(reason) => {
                    failures.push(reason);
                }
            }
        }

        self.store.set_meta(
            META_LAST_SYNC_TIME,
            &chrono::Utc::now().timestamp_millis().to_string(),
        )?;

        let remaining = self.queue.len()?;
        let _ = self.events.send(SyncEvent::Completed { synced, remaining });
        if !failures.is_empty() {
            let _ = self.events.send(SyncEvent::Error {
                message: failures.join("; "),
            });
        }
        tracing::info!(synced, remaining, "Drain complete");

        Ok(DrainReport { synced, failures })
    }

    /// Replay one queue item, classifying the failure modes
    async fn apply_item(&self, item: &QueueItem) -> Result<ItemOutcome> {
        let outcome = match item.action {
            QueueAction::Insert => self.apply_insert(item).await,
            QueueAction::Update => self.apply_update(item).await,
            QueueAction::Delete => self.apply_delete(item).await,
        };

        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(ApplyError::Remote(RemoteError::Transient(message))) => {
                let attempts = self.queue.record_attempt(&item.id)?;
                if attempts >= self.config.max_attempts {
                    // Judged permanently unrecoverable; keeping it would
                    // retry forever
                    self.queue.remove(&item.id)?;
                    let reason = format!(
                        "dropped {} on {}/{} after {attempts} attempts: {message}",
                        item.action, item.table, item.record_id
                    );
                    tracing::error!(
                        table = %item.table,
                        record_id = %item.record_id,
                        attempts,
                        "Dropping mutation after repeated transient failures"
                    );
                    Ok(ItemOutcome::Dropped(reason))
                } else {
                    tracing::debug!(
                        table = %item.table,
                        record_id = %item.record_id,
                        attempts,
                        %message,
                        "Transient failure; mutation left queued"
                    );
                    Ok(ItemOutcome::Deferred)
                }
            }
            Err(ApplyError::Remote(RemoteError::Rejected(message))) => {
                self.queue.remove(&item.id)?;
                let reason = format!(
                    "remote rejected {} on {}/{}: {message}",
                    item.action, item.table, item.record_id
                );
                tracing::error!(
                    table = %item.table,
                    record_id = %item.record_id,
                    %message,
                    "Mutation rejected by remote; dropped from queue"
                );
                Ok(ItemOutcome::Dropped(reason))
            }
            Err(ApplyError::Storage(error)) => Err(error),
        }
    }

    async fn apply_insert(&self, item: &QueueItem) -> std::result::Result<ItemOutcome, ApplyError> {
        // Ids are client-generated; no collision to pre-check
        let server = self.remote.insert(&item.table, &item.data).await?;
        self.finish_applied(item, &server)?;
        Ok(ItemOutcome::Applied)
    }

    async fn apply_update(&self, item: &QueueItem) -> std::result::Result<ItemOutcome, ApplyError> {
        let shadow = self.store.shadow(&item.table, &item.record_id)?;
        let Some(server) = self.remote.fetch(&item.table, &item.record_id).await? else {
            // Gone (or never created) remotely; the queued write survives
            let server = self.remote.insert(&item.table, &item.data).await?;
            self.finish_applied(item, &server)?;
            return Ok(ItemOutcome::Applied);
        };

        let server_unchanged = shadow
            .as_ref()
            .is_some_and(|base| resolver::stable_eq(&server, base));
        if server_unchanged {
            let server = self
                .remote
                .update(&item.table, &item.record_id, &item.data)
                .await?;
            self.finish_applied(item, &server)?;
            return Ok(ItemOutcome::Applied);
        }

        if resolver::detect_conflict(&item.data, &server, shadow.as_ref()) {
            let conflict = build_conflict(item, server, shadow);
            let resolution = resolver::resolve_conflict(&conflict, self.config.default_strategy);
            return self.apply_resolution(item, resolution).await;
        }

        // The server moved but the local value matches one side; adopt the
        // server copy and retire the no-op update
        self.store.put_raw(&item.table, &server)?;
        self.store.put_shadow(&item.table, &item.record_id, &server)?;
        self.queue.remove(&item.id)?;
        Ok(ItemOutcome::Applied)
    }

    async fn apply_delete(&self, item: &QueueItem) -> std::result::Result<ItemOutcome, ApplyError> {
        let shadow = self.store.shadow(&item.table, &item.record_id)?;
        let Some(server) = self.remote.fetch(&item.table, &item.record_id).await? else {
            // Already absent; the delete is complete
            self.store.remove_shadow(&item.table, &item.record_id)?;
            self.queue.remove(&item.id)?;
            return Ok(ItemOutcome::Applied);
        };

        let server_unchanged = shadow
            .as_ref()
            .map_or(true, |base| resolver::stable_eq(&server, base));
        if server_unchanged {
            self.remote.delete(&item.table, &item.record_id).await?;
            self.store.remove_shadow(&item.table, &item.record_id)?;
            self.queue.remove(&item.id)?;
            return Ok(ItemOutcome::Applied);
        }

        // Delete/update clash: never auto-pick a side
        self.queue.set_conflicted(&item.id, true)?;
        let reason = format!(
            "record {}/{} changed on the server after the local delete",
            item.table, item.record_id
        );
        tracing::warn!(
            table = %item.table,
            record_id = %item.record_id,
            "Delete conflicts with a newer server version; awaiting user resolution"
        );
        Ok(ItemOutcome::Conflicted(reason))
    }

    /// Act on a resolver verdict for an update conflict
    async fn apply_resolution(
        &self,
        item: &QueueItem,
        resolution: ConflictResolution,
    ) -> std::result::Result<ItemOutcome, ApplyError> {
        if resolution.requires_user_action {
            self.queue.set_conflicted(&item.id, true)?;
            let reason = resolution.reason.unwrap_or_else(|| {
                format!(
                    "record {}/{} needs user resolution",
                    item.table, item.record_id
                )
            });
            tracing::warn!(
                table = %item.table,
                record_id = %item.record_id,
                %reason,
                "Conflict needs user resolution; mutation left queued"
            );
            return Ok(ItemOutcome::Conflicted(reason));
        }

        let Some(resolved) = resolution.resolved else {
            self.queue.set_conflicted(&item.id, true)?;
            return Ok(ItemOutcome::Conflicted(format!(
                "record {}/{} resolution produced no value",
                item.table, item.record_id
            )));
        };

        let server = self
            .remote
            .update(&item.table, &item.record_id, &resolved)
            .await?;
        self.finish_applied(item, &server)?;
        tracing::debug!(
            table = %item.table,
            record_id = %item.record_id,
            "Conflict merged cleanly"
        );
        Ok(ItemOutcome::Applied)
    }

    /// Refresh the local copy and shadow from the server's record, then
    /// retire the queue item
    fn finish_applied(&self, item: &QueueItem, server: &Value) -> Result<()> {
        self.store.put_raw(&item.table, server)?;
        self.store.put_shadow(&item.table, &item.record_id, server)?;
        self.queue.remove(&item.id)?;
        Ok(())
    }
}

/// Assemble the transient conflict record handed to the resolver
fn build_conflict(item: &QueueItem, server: Value, shadow: Option<Value>) -> ConflictItem {
    let local = if item.action == QueueAction::Delete {
        Value::Null
    } else {
        item.data.clone()
    };
    let server_updated_at = server
        .get("updated_at")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    ConflictItem {
        id: item.record_id.clone(),
        table: item.table.clone(),
        local,
        server,
        last_synced: shadow,
        local_updated_at: item.enqueued_at,
        server_updated_at,
    }
}

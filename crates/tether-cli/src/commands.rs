//! Subcommand implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tether_core::remote::HttpRemote;
use tether_core::store::META_LAST_SYNC_TIME;
use tether_core::{
    Database, Error, LocalStore, MergeStrategy, NetworkMonitor, QueueItem, RemoteService,
    SyncConfig, SyncManager, SyncQueue,
};

use crate::error::CliError;

/// Default database location under the platform data directory
pub fn default_db_path() -> Result<PathBuf, CliError> {
    let dir = dirs::data_dir().ok_or(CliError::NoDataDir)?;
    Ok(dir.join("tether").join("tether.db"))
}

fn open(db_path: &Path) -> Result<(LocalStore, SyncQueue), CliError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    tracing::debug!(path = %db_path.display(), "Opening local database");
    let db = Database::open(db_path)?;
    Ok((LocalStore::new(db.clone()), SyncQueue::new(db)))
}

fn manager(db_path: &Path, endpoint: &str) -> Result<SyncManager, CliError> {
    let (store, queue) = open(db_path)?;
    let remote = Arc::new(HttpRemote::new(endpoint)?) as Arc<dyn RemoteService>;
    // One-shot invocations: the drain is explicit, no timer or watcher
    let config = SyncConfig::default().without_periodic_sync();
    Ok(SyncManager::new(
        store,
        queue,
        NetworkMonitor::new(true),
        remote,
        config,
    ))
}

#[derive(Serialize)]
struct StatusReport {
    pending: usize,
    conflicted: usize,
    last_sync_time: Option<String>,
}

pub fn run_status(db_path: &Path, as_json: bool) -> Result<(), CliError> {
    let (store, queue) = open(db_path)?;
    let items = queue.all()?;
    let report = StatusReport {
        pending: items.len(),
        conflicted: items.iter().filter(|item| item.conflicted).count(),
        last_sync_time: store
            .meta(META_LAST_SYNC_TIME)?
            .and_then(|value| value.parse::<i64>().ok())
            .and_then(format_time),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("pending:        {}", report.pending);
        println!("conflicted:     {}", report.conflicted);
        println!(
            "last sync time: {}",
            report.last_sync_time.as_deref().unwrap_or("never")
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct QueueLine {
    id: String,
    action: String,
    table: String,
    record_id: String,
    enqueued_at: Option<String>,
    attempts: u32,
    conflicted: bool,
}

impl From<&QueueItem> for QueueLine {
    fn from(item: &QueueItem) -> Self {
        Self {
            id: item.id.clone(),
            action: item.action.to_string(),
            table: item.table.clone(),
            record_id: item.record_id.clone(),
            enqueued_at: format_time(item.enqueued_at),
            attempts: item.attempts,
            conflicted: item.conflicted,
        }
    }
}

pub fn run_pending(db_path: &Path, as_json: bool) -> Result<(), CliError> {
    let (_, queue) = open(db_path)?;
    let items = queue.all()?;

    if as_json {
        let lines: Vec<QueueLine> = items.iter().map(QueueLine::from).collect();
        println!("{}", serde_json::to_string_pretty(&lines)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("queue is empty");
        return Ok(());
    }
    for line in items.iter().map(QueueLine::from).map(format_queue_line) {
        println!("{line}");
    }
    Ok(())
}

fn format_queue_line(line: QueueLine) -> String {
    let marker = if line.conflicted { " [conflicted]" } else { "" };
    format!(
        "{}  {:<6} {}/{}  enqueued {}  attempts {}{}",
        line.id,
        line.action,
        line.table,
        line.record_id,
        line.enqueued_at.as_deref().unwrap_or("?"),
        line.attempts,
        marker
    )
}

pub fn run_drop(db_path: &Path, id: &str) -> Result<(), CliError> {
    let (_, queue) = open(db_path)?;
    match queue.remove(id) {
        Ok(()) => {
            println!("dropped {id}");
            Ok(())
        }
        Err(Error::NotFound(_)) => Err(CliError::ItemNotFound(id.to_string())),
        Err(e) => Err(e.into()),
    }
}

pub async fn run_resolve(
    db_path: &Path,
    id: &str,
    strategy: MergeStrategy,
    endpoint: &str,
) -> Result<(), CliError> {
    let manager = manager(db_path, endpoint)?;
    let resolution = manager.resolve_conflicted(id, strategy).await?;

    if resolution.requires_user_action {
        println!(
            "not applied: {}",
            resolution.reason.as_deref().unwrap_or("unresolvable")
        );
    } else {
        println!("resolved {id}");
    }
    Ok(())
}

pub async fn run_sync(db_path: &Path, endpoint: &str) -> Result<(), CliError> {
    let manager = manager(db_path, endpoint)?;
    tracing::info!(endpoint, "Draining sync queue against remote");
    manager.trigger_sync().await?;

    let state = manager.sync_state()?;
    println!("synced; {} item(s) remaining", state.pending_count);
    if let Some(error) = state.last_sync_error {
        println!("with failures: {error}");
    }
    Ok(())
}

fn format_time(millis: i64) -> Option<String> {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_core::QueueAction;

    #[test]
    fn test_status_and_drop_on_fresh_db() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tether.db");

        run_status(&path, false).unwrap();
        let err = run_drop(&path, "missing").unwrap_err();
        assert!(matches!(err, CliError::ItemNotFound(_)));
    }

    #[test]
    fn test_format_queue_line_marks_conflicts() {
        let mut item = QueueItem::new("tasks", QueueAction::Update, "t1", json!({"id": "t1"}));
        item.conflicted = true;
        let line = format_queue_line(QueueLine::from(&item));
        assert!(line.contains("tasks/t1"));
        assert!(line.contains("[conflicted]"));
    }
}

//! Backup — timestamped file copies of the SQLite database
//!
//! `sales.db` is copied to `sales_backup_20240131_235959.db` in the same
//! directory. The timestamp format sorts chronologically by name, which the
//! retention pass relies on.

use chrono::{DateTime, Local};
use persistence::{Database, DbError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

const BACKUP_MARKER: &str = "_backup_";
const BACKUP_EXTENSION: &str = "db";

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("In-memory database cannot be backed up")]
    NoFile,

    #[error("Backup I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Db(#[from] DbError),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> BackupError {
    let path = path.to_path_buf();
    move |source| BackupError::Io { path, source }
}

fn backup_prefix(db_path: &Path) -> String {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{stem}{BACKUP_MARKER}")
}

/// Backup file name for `db_path` taken at `now`
pub fn backup_path_for(db_path: &Path, now: DateTime<Local>) -> PathBuf {
    let name = format!(
        "{}{}.{BACKUP_EXTENSION}",
        backup_prefix(db_path),
        now.format("%Y%m%d_%H%M%S")
    );
    db_path.with_file_name(name)
}

/// Checkpoint the WAL and copy the database file next to itself.
/// Holds `lock` so no import is mid-transaction during the copy.
pub async fn backup_database(
    db: &Database,
    lock: &Mutex<()>,
    now: DateTime<Local>,
) -> Result<PathBuf, BackupError> {
    let db_path = db.path().ok_or(BackupError::NoFile)?;
    let target = backup_path_for(db_path, now);

    let _guard = lock.lock().await;
    db.checkpoint().await?;
    let bytes = tokio::fs::copy(db_path, &target)
        .await
        .map_err(io_err(&target))?;

    info!(backup = %target.display(), bytes, "Database backup created");
    Ok(target)
}

/// Backups of `db_path`, oldest first
pub async fn list_backups(db_path: &Path) -> Result<Vec<PathBuf>, BackupError> {
    let dir = match db_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = backup_prefix(db_path);

    let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_err(&dir))?;
    let mut backups = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
        let path = entry.path();
        let is_backup = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix))
            && path.extension().and_then(|e| e.to_str()) == Some(BACKUP_EXTENSION);
        if is_backup {
            backups.push(path);
        }
    }

    backups.sort();
    Ok(backups)
}

/// Keep the `keep` newest backups of `db_path`, delete the rest.
/// Returns the deleted paths.
pub async fn apply_retention(db_path: &Path, keep: usize) -> Result<Vec<PathBuf>, BackupError> {
    let backups = list_backups(db_path).await?;
    if backups.len() <= keep {
        return Ok(Vec::new());
    }

    let excess = backups.len() - keep;
    let mut removed = Vec::with_capacity(excess);
    for path in backups.into_iter().take(excess) {
        tokio::fs::remove_file(&path).await.map_err(io_err(&path))?;
        debug!(backup = %path.display(), "Old backup removed");
        removed.push(path);
    }

    Ok(removed)
}

//! Refresh loop — periodic backup and re-import of the sales CSV
//!
//! Each cycle backs the database up, waits one interval, then re-imports the
//! CSV if its contents changed since the last successful import. Failures are
//! logged and recorded in [`RefreshProgress`]; the loop keeps going until
//! cancelled.

use crate::backup::{apply_retention, backup_database};
use crate::ingest::{fingerprint, ingest_bytes, read_csv_file, IngestError, IngestSummary};
use chrono::Local;
use persistence::Database;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const CANCEL_POLL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub csv_path: PathBuf,
    /// Pause between a backup and the following re-import
    pub interval: Duration,
    /// Number of backups to keep; `None` keeps all
    pub keep_backups: Option<usize>,
    /// Re-import even when the CSV fingerprint is unchanged
    pub force: bool,
}

impl RefreshConfig {
    pub fn new(csv_path: impl Into<PathBuf>) -> Self {
        Self {
            csv_path: csv_path.into(),
            interval: Duration::from_secs(60),
            keep_backups: None,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RefreshStatus {
    Idle,
    Running,
    /// Running, but the last backup or import failed
    Error,
}

/// Shared state of the refresh loop, read by the status endpoint
pub struct RefreshProgress {
    status: RwLock<RefreshStatus>,
    cancelled: AtomicBool,
    cycles: AtomicU64,
    last_import: RwLock<Option<IngestSummary>>,
    last_backup: RwLock<Option<String>>,
    last_error: RwLock<Option<String>>,
}

/// Point-in-time copy of [`RefreshProgress`]
#[derive(Debug, Clone, Serialize)]
pub struct RefreshSnapshot {
    pub status: RefreshStatus,
    pub cycles: u64,
    pub last_import: Option<IngestSummary>,
    pub last_backup: Option<String>,
    pub last_error: Option<String>,
}

impl RefreshProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(RefreshStatus::Idle),
            cancelled: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            last_import: RwLock::new(None),
            last_backup: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> RefreshStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Fingerprint of the last successful import
    pub fn last_fingerprint(&self) -> Option<String> {
        self.last_import
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.fingerprint.clone())
    }

    pub fn snapshot(&self) -> RefreshSnapshot {
        RefreshSnapshot {
            status: self.status(),
            cycles: self.cycles(),
            last_import: self
                .last_import
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            last_backup: self
                .last_backup
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            last_error: self
                .last_error
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    fn set_status(&self, status: RefreshStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn record_import(&self, summary: IngestSummary) {
        *self.last_import.write().unwrap_or_else(PoisonError::into_inner) = Some(summary);
    }

    fn record_backup(&self, path: String) {
        *self.last_backup.write().unwrap_or_else(PoisonError::into_inner) = Some(path);
    }

    fn record_error(&self, message: String) {
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = Some(message);
        self.set_status(RefreshStatus::Error);
    }

    fn clear_error(&self) {
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.set_status(RefreshStatus::Running);
    }
}

impl Default for RefreshProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Single steps
// ---------------------------------------------------------------------------

/// Import the CSV unless its fingerprint matches the last successful import.
/// Returns `None` when the file was unchanged.
pub async fn refresh_once(
    db: &Database,
    lock: &Mutex<()>,
    progress: &RefreshProgress,
    config: &RefreshConfig,
) -> Result<Option<IngestSummary>, IngestError> {
    let data = read_csv_file(&config.csv_path).await?;

    let current = fingerprint(&data);
    if !config.force && progress.last_fingerprint().as_deref() == Some(current.as_str()) {
        debug!(csv = %config.csv_path.display(), "CSV unchanged, skipping import");
        return Ok(None);
    }

    import_data(db, lock, progress, config, &data).await.map(Some)
}

/// First load at startup: always imports, and records a failure in `progress`
pub async fn initial_import(
    db: &Database,
    lock: &Mutex<()>,
    progress: &RefreshProgress,
    config: &RefreshConfig,
) -> Result<IngestSummary, IngestError> {
    let result = async {
        let data = read_csv_file(&config.csv_path).await?;
        import_data(db, lock, progress, config, &data).await
    }
    .await;
    if let Err(e) = &result {
        progress.record_error(format!("Import failed: {e}"));
    }
    result
}

async fn import_data(
    db: &Database,
    lock: &Mutex<()>,
    progress: &RefreshProgress,
    config: &RefreshConfig,
    data: &[u8],
) -> Result<IngestSummary, IngestError> {
    let source = config.csv_path.display().to_string();
    let summary = ingest_bytes(db.pool(), &source, data, lock).await?;
    progress.record_import(summary.clone());
    Ok(summary)
}

/// Back up the database and prune old backups. Errors are logged and
/// recorded, not returned; `false` means the backup itself failed.
pub async fn backup_step(
    db: &Database,
    lock: &Mutex<()>,
    progress: &RefreshProgress,
    config: &RefreshConfig,
) -> bool {
    match backup_database(db, lock, Local::now()).await {
        Ok(path) => {
            progress.record_backup(path.display().to_string());
            if let (Some(keep), Some(db_path)) = (config.keep_backups, db.path()) {
                match apply_retention(db_path, keep).await {
                    Ok(removed) if !removed.is_empty() => {
                        info!(removed = removed.len(), keep, "Backup retention applied");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Backup retention failed"),
                }
            }
            true
        }
        Err(e) => {
            warn!(error = %e, "Backup failed");
            progress.record_error(format!("Backup failed: {e}"));
            false
        }
    }
}

/// Sleep for `duration`, waking early on cancel. Returns `true` if cancelled.
async fn cancellable_sleep(progress: &RefreshProgress, duration: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if progress.is_cancelled() {
            return true;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
    }
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Run backup/re-import cycles until `progress` is cancelled
pub async fn run_refresh_loop(
    db: &Database,
    lock: &Mutex<()>,
    progress: &RefreshProgress,
    config: &RefreshConfig,
) {
    info!(
        csv = %config.csv_path.display(),
        interval_secs = config.interval.as_secs_f64(),
        keep_backups = ?config.keep_backups,
        "Refresh loop starting"
    );
    progress.set_status(RefreshStatus::Running);

    loop {
        if progress.is_cancelled() {
            break;
        }

        let backup_ok = backup_step(db, lock, progress, config).await;

        if cancellable_sleep(progress, config.interval).await {
            break;
        }

        match refresh_once(db, lock, progress, config).await {
            Ok(_) if backup_ok => progress.clear_error(),
            Ok(_) => {}
            Err(e) => {
                warn!(csv = %config.csv_path.display(), error = %e, "CSV refresh failed");
                progress.record_error(format!("Import failed: {e}"));
            }
        }

        let cycle = progress.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(cycle, "Refresh cycle complete");
    }

    progress.set_status(RefreshStatus::Idle);
    info!(cycles = progress.cycles(), "Refresh loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::list_backups;
    use persistence::repository::SalesRepository;
    use std::sync::Arc;

    const HEADER: &str = "Order ID,Customer ID,Customer Name,Customer Email,Customer Address,\
Product ID,Product Name,Category,Region,Date of Sale,Quantity Sold,Unit Price,Discount,\
Shipping Cost,Payment Method";

    fn write_csv(path: &std::path::Path, rows: &[&str]) {
        let mut body = format!("{HEADER}\n");
        for row in rows {
            body.push_str(row);
            body.push('\n');
        }
        std::fs::write(path, body).unwrap();
    }

    async fn wait_for_cycles(progress: &RefreshProgress, target: u64) {
        for _ in 0..200 {
            if progress.cycles() >= target {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("refresh loop did not reach {target} cycles");
    }

    #[tokio::test]
    async fn test_refresh_once_skips_unchanged_file() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("input.csv");
        write_csv(
            &csv,
            &["O1,C1,Alice,a@x.com,Addr,P1,Widget,Toys,North,2024-01-10,1,10,0,0,Card"],
        );

        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());
        let progress = RefreshProgress::new();
        let config = RefreshConfig::new(&csv);

        let first = refresh_once(&db, &lock, &progress, &config).await.unwrap();
        assert!(first.is_some());
        let second = refresh_once(&db, &lock, &progress, &config).await.unwrap();
        assert!(second.is_none());

        let forced = RefreshConfig {
            force: true,
            ..config.clone()
        };
        assert!(refresh_once(&db, &lock, &progress, &forced)
            .await
            .unwrap()
            .is_some());

        write_csv(
            &csv,
            &["O1,C1,Alice,a@x.com,Addr,P1,Widget,Toys,North,2024-01-10,7,10,0,0,Card"],
        );
        let changed = refresh_once(&db, &lock, &progress, &config).await.unwrap();
        assert_eq!(changed.map(|s| s.rows_imported), Some(1));
    }

    #[tokio::test]
    async fn test_initial_import_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());
        let progress = RefreshProgress::new();
        let config = RefreshConfig::new(dir.path().join("absent.csv"));

        assert!(initial_import(&db, &lock, &progress, &config).await.is_err());
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.status, RefreshStatus::Error);
        assert!(snapshot.last_import.is_none());

        write_csv(
            &config.csv_path,
            &["O1,C1,Alice,a@x.com,Addr,P1,Widget,Toys,North,2024-01-10,1,10,0,0,Card"],
        );
        let summary = initial_import(&db, &lock, &progress, &config).await.unwrap();
        assert_eq!(summary.rows_imported, 1);
        assert_eq!(progress.last_fingerprint(), Some(summary.fingerprint));
    }

    #[tokio::test]
    async fn test_backup_step_records_failure_for_in_memory() {
        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());
        let progress = RefreshProgress::new();
        let config = RefreshConfig::new("unused.csv");

        backup_step(&db, &lock, &progress, &config).await;

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.status, RefreshStatus::Error);
        assert!(snapshot.last_backup.is_none());
        assert!(snapshot.last_error.unwrap().starts_with("Backup failed"));
    }

    #[tokio::test]
    async fn test_loop_reimports_backs_up_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("input.csv");
        let db_path = dir.path().join("sales.db");
        write_csv(
            &csv,
            &["O1,C1,Alice,a@x.com,Addr,P1,Widget,Toys,North,2024-01-10,1,10,0,0,Card"],
        );

        let db = Arc::new(Database::new(&db_path).await.unwrap());
        let lock = Arc::new(Mutex::new(()));
        let progress = Arc::new(RefreshProgress::new());
        let config = RefreshConfig {
            interval: Duration::from_millis(20),
            keep_backups: Some(1),
            ..RefreshConfig::new(&csv)
        };

        let handle = {
            let (db, lock, progress) = (db.clone(), lock.clone(), progress.clone());
            tokio::spawn(async move {
                run_refresh_loop(&db, &lock, &progress, &config).await;
            })
        };

        wait_for_cycles(&progress, 1).await;
        let repo = SalesRepository::new(db.pool());
        assert!(repo.get_order("O1").await.unwrap().is_some());

        write_csv(
            &csv,
            &[
                "O1,C1,Alice,a@x.com,Addr,P1,Widget,Toys,North,2024-01-10,1,10,0,0,Card",
                "O2,C1,Alice,a@x.com,Addr,P1,Widget,Toys,North,2024-01-11,2,10,0,0,Card",
            ],
        );
        let seen = progress.cycles();
        wait_for_cycles(&progress, seen + 2).await;
        assert!(repo.get_order("O2").await.unwrap().is_some());

        progress.cancel();
        handle.await.unwrap();

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.status, RefreshStatus::Idle);
        assert!(snapshot.last_backup.is_some());
        assert!(snapshot.last_error.is_none());
        assert_eq!(snapshot.last_import.unwrap().orders, 2);
        assert!(list_backups(&db_path).await.unwrap().len() <= 1);
    }

    #[tokio::test]
    async fn test_missing_csv_is_recorded_and_loop_continues() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::new(dir.path().join("sales.db")).await.unwrap());
        let lock = Arc::new(Mutex::new(()));
        let progress = Arc::new(RefreshProgress::new());
        let config = RefreshConfig {
            interval: Duration::from_millis(10),
            ..RefreshConfig::new(dir.path().join("absent.csv"))
        };

        let handle = {
            let (db, lock, progress) = (db.clone(), lock.clone(), progress.clone());
            tokio::spawn(async move {
                run_refresh_loop(&db, &lock, &progress, &config).await;
            })
        };

        wait_for_cycles(&progress, 2).await;
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.status, RefreshStatus::Error);
        assert!(snapshot.last_error.unwrap().starts_with("Import failed"));

        progress.cancel();
        handle.await.unwrap();
        assert_eq!(progress.status(), RefreshStatus::Idle);
    }
}

//! Sales Report Engine — CSV ingestion, backups, and the refresh loop
//!
//! Provides:
//! - CSV reading with per-row numeric coercion (rows with nulls are skipped)
//! - Upsert reconciliation of customers, products and orders by natural key
//! - Timestamped file-copy backups with retention
//! - Background loop that backs up and re-imports on an interval

pub mod backup;
pub mod csv_source;
pub mod ingest;
pub mod refresh;

use std::sync::Arc;
use tokio::sync::Mutex;

// Re-exports for convenience
pub use backup::{apply_retention, backup_database, backup_path_for, list_backups, BackupError};
pub use csv_source::{parse_sales, ParsedSales, SaleRow};
pub use ingest::{fingerprint, ingest_bytes, ingest_csv, IngestError, IngestSummary};
pub use refresh::{
    backup_step, initial_import, refresh_once, run_refresh_loop, RefreshConfig, RefreshProgress,
    RefreshSnapshot, RefreshStatus,
};

/// Process-wide lock serialising imports and backups
pub type DbLock = Arc<Mutex<()>>;

pub fn new_db_lock() -> DbLock {
    Arc::new(Mutex::new(()))
}

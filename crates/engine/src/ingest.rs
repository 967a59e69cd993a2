//! Ingestion — reconcile a sales CSV into the database
//!
//! Each accepted row upserts its customer, product and order (in that order,
//! orders reference the other two). A whole file commits as one transaction
//! while the process-wide lock is held; later rows win on duplicate ids.

use crate::csv_source::parse_sales;
use chrono::{DateTime, Utc};
use persistence::repository::SalesRepository;
use persistence::{DbError, SqlitePool};
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Required column '{0}' not found in CSV header")]
    MissingColumn(&'static str),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<sqlx::Error> for IngestError {
    fn from(e: sqlx::Error) -> Self {
        Self::Db(DbError::Sqlx(e))
    }
}

/// Outcome of one import
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub csv_path: String,
    /// SHA-256 of the file bytes (hex)
    pub fingerprint: String,
    pub rows_read: usize,
    pub rows_imported: usize,
    pub rows_skipped: usize,
    /// Distinct ids touched in this import
    pub customers: usize,
    pub products: usize,
    pub orders: usize,
    /// Revenue of the imported rows, duplicates included; `None` when the
    /// total does not fit in a `Decimal`
    pub revenue_imported: Option<Decimal>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Hex SHA-256 of a file's contents
pub fn fingerprint(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Read the whole CSV file
pub async fn read_csv_file(path: &Path) -> Result<Vec<u8>, IngestError> {
    tokio::fs::read(path).await.map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read `csv_path` and reconcile it into the database under `lock`
pub async fn ingest_csv(
    pool: &SqlitePool,
    csv_path: &Path,
    lock: &Mutex<()>,
) -> Result<IngestSummary, IngestError> {
    let data = read_csv_file(csv_path).await?;
    ingest_bytes(pool, &csv_path.display().to_string(), &data, lock).await
}

/// Reconcile already-read CSV bytes; `source` only labels the summary
pub async fn ingest_bytes(
    pool: &SqlitePool,
    source: &str,
    data: &[u8],
    lock: &Mutex<()>,
) -> Result<IngestSummary, IngestError> {
    let started_at = Utc::now();
    let parsed = parse_sales(data)?;

    let _guard = lock.lock().await;

    let repo = SalesRepository::new(pool);
    let mut tx = repo.begin().await?;

    let mut customers = HashSet::new();
    let mut products = HashSet::new();
    let mut orders = HashSet::new();
    let mut revenue_imported = Some(Decimal::ZERO);

    for row in &parsed.rows {
        SalesRepository::upsert_customer(&mut *tx, &row.customer()).await?;
        SalesRepository::upsert_product(&mut *tx, &row.product()).await?;
        SalesRepository::upsert_order(&mut *tx, &row.order()).await?;

        customers.insert(row.customer_id.as_str());
        products.insert(row.product_id.as_str());
        orders.insert(row.order_id.as_str());
        revenue_imported = revenue_imported
            .zip(row.revenue())
            .and_then(|(total, revenue)| total.checked_add(revenue));
    }

    tx.commit().await?;

    let summary = IngestSummary {
        csv_path: source.to_string(),
        fingerprint: fingerprint(data),
        rows_read: parsed.rows_read,
        rows_imported: parsed.rows.len(),
        rows_skipped: parsed.rows_skipped,
        customers: customers.len(),
        products: products.len(),
        orders: orders.len(),
        revenue_imported,
        started_at,
        finished_at: Utc::now(),
    };

    info!(
        csv = %summary.csv_path,
        rows_read = summary.rows_read,
        imported = summary.rows_imported,
        skipped = summary.rows_skipped,
        orders = summary.orders,
        revenue = ?summary.revenue_imported,
        "CSV import complete"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::repository::{DateRange, RevenueRepository};
    use persistence::Database;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    const HEADER: &str = "Order ID,Customer ID,Customer Name,Customer Email,Customer Address,\
Product ID,Product Name,Category,Region,Date of Sale,Quantity Sold,Unit Price,Discount,\
Shipping Cost,Payment Method";

    fn sample_csv() -> String {
        format!(
            "{HEADER}\n\
O1,C1,Alice,alice@example.com,1 Main St,P1,Widget,Toys,North,2024-01-10,2,10,1,3,Card\n\
O2,C2,Bob,bob@example.com,2 Side St,P2,Novel,Books,South,2024-02-15,1,20,0,5,Cash\n\
O3,C1,Alice,alice@example.com,1 Main St,P2,Novel,Books,North,2024-03-01,,20,0,5,Cash\n"
        )
    }

    #[tokio::test]
    async fn test_ingest_imports_and_skips() {
        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());

        let summary = ingest_bytes(db.pool(), "memory", sample_csv().as_bytes(), &lock)
            .await
            .unwrap();

        assert_eq!(summary.rows_read, 3);
        assert_eq!(summary.rows_imported, 2);
        assert_eq!(summary.rows_skipped, 1);
        assert_eq!(summary.customers, 2);
        assert_eq!(summary.products, 2);
        assert_eq!(summary.orders, 2);
        assert_eq!(summary.revenue_imported, Some(dec!(47)));
        assert_eq!(summary.fingerprint.len(), 64);

        let counts = SalesRepository::new(db.pool()).counts().await.unwrap();
        assert_eq!(counts.orders, 2);

        let total = RevenueRepository::new(db.pool())
            .total_revenue(&DateRange::new("2024-01-01", "2024-12-31"))
            .await
            .unwrap();
        assert_eq!(total, 47.0);
    }

    #[tokio::test]
    async fn test_reimport_updates_existing_rows() {
        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());
        ingest_bytes(db.pool(), "memory", sample_csv().as_bytes(), &lock)
            .await
            .unwrap();

        let updated = format!(
            "{HEADER}\n\
O1,C1,Alice Smith,alice@new.example.com,9 New Rd,P1,Widget Pro,Gadgets,East,2024-01-12,4,10,1,3,Card\n"
        );
        ingest_bytes(db.pool(), "memory", updated.as_bytes(), &lock)
            .await
            .unwrap();

        let repo = SalesRepository::new(db.pool());
        let customer = repo.get_customer("C1").await.unwrap().unwrap();
        assert_eq!(customer.name, "Alice Smith");
        assert_eq!(customer.address, "9 New Rd");

        let product = repo.get_product("P1").await.unwrap().unwrap();
        assert_eq!(product.category, "Gadgets");

        let order = repo.get_order("O1").await.unwrap().unwrap();
        assert_eq!(order.quantity, 4);
        assert_eq!(order.region, "East");
        assert_eq!(order.date, "2024-01-12");

        // Rows absent from the new file are left alone
        assert!(repo.get_order("O2").await.unwrap().is_some());
        assert_eq!(repo.counts().await.unwrap().orders, 2);
    }

    #[tokio::test]
    async fn test_duplicate_order_ids_last_row_wins() {
        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());
        let csv = format!(
            "{HEADER}\n\
O1,C1,Alice,a@x.com,Addr,P1,Widget,Toys,North,2024-01-10,1,10,0,0,Card\n\
O1,C1,Alice,a@x.com,Addr,P1,Widget,Toys,West,2024-01-10,3,10,0,0,Card\n"
        );
        let summary = ingest_bytes(db.pool(), "memory", csv.as_bytes(), &lock)
            .await
            .unwrap();
        assert_eq!(summary.rows_imported, 2);
        assert_eq!(summary.orders, 1);

        let order = SalesRepository::new(db.pool())
            .get_order("O1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.quantity, 3);
        assert_eq!(order.region, "West");
    }

    #[tokio::test]
    async fn test_missing_column_imports_nothing() {
        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());
        let err = ingest_bytes(db.pool(), "memory", b"Order ID\nO1\n", &lock)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn("Customer ID")));
        assert_eq!(
            SalesRepository::new(db.pool()).counts().await.unwrap().orders,
            0
        );
    }

    #[tokio::test]
    async fn test_ingest_csv_missing_file() {
        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());
        let dir = tempfile::tempdir().unwrap();
        let err = ingest_csv(db.pool(), &dir.path().join("absent.csv"), &lock)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Io { .. }));
    }

    #[tokio::test]
    async fn test_large_values_import_without_decimal_revenue() {
        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());
        let csv = format!(
            "{HEADER}\n\
O1,C1,Alice,a@x.com,Addr,P1,Widget,Toys,North,2024-01-10,1000000000000000000,100000000000,0,0,Card\n\
O2,C1,Alice,a@x.com,Addr,P1,Widget,Toys,North,2024-01-11,1,10,0,0,Card\n"
        );

        let summary = ingest_bytes(db.pool(), "memory", csv.as_bytes(), &lock)
            .await
            .unwrap();
        assert_eq!(summary.rows_imported, 2);
        assert_eq!(summary.rows_skipped, 0);
        assert_eq!(summary.revenue_imported, None);

        let order = SalesRepository::new(db.pool())
            .get_order("O1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.quantity, 1_000_000_000_000_000_000);
        assert_eq!(order.unit_price, 100_000_000_000.0);
    }

    #[tokio::test]
    async fn test_import_waits_for_lock() {
        let db = Database::in_memory().await.unwrap();
        let lock = Mutex::new(());
        let csv = sample_csv();

        let guard = lock.lock().await;
        let import = ingest_bytes(db.pool(), "memory", csv.as_bytes(), &lock);
        tokio::pin!(import);

        let pending = tokio::time::timeout(Duration::from_millis(100), &mut import).await;
        assert!(pending.is_err());
        assert_eq!(
            SalesRepository::new(db.pool()).counts().await.unwrap().orders,
            0
        );

        drop(guard);
        let summary = import.await.unwrap();
        assert_eq!(summary.orders, 2);
    }

    #[test]
    fn test_fingerprint_is_content_based() {
        assert_eq!(fingerprint(b"abc"), fingerprint(b"abc"));
        assert_ne!(fingerprint(b"abc"), fingerprint(b"abd"));
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}

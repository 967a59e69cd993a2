//! Sales Report — revenue rollups over a periodically refreshed sales CSV
//!
//! Usage:
//!   sales-report serve --port 8080      — Import, then serve the API and refresh in background
//!   sales-report import                 — One-shot CSV import
//!   sales-report backup --keep-backups 5 — One-shot database backup

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use engine::{
    apply_retention, backup_database, ingest_csv, initial_import, new_db_lock, run_refresh_loop,
    IngestSummary, RefreshConfig, RefreshProgress, RefreshSnapshot,
};
use persistence::repository::{
    CategoryRevenue, DateRange, PeriodRevenue, ProductRevenue, RegionRevenue, RevenueRepository,
    SalesRepository, TrendInterval,
};
use persistence::{Database, DbError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_REFRESH_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "sales-report")]
#[command(about = "Sales CSV ingestion and revenue reporting API", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// SQLite database file
    #[arg(
        long,
        global = true,
        env = "SALES_DB_PATH",
        default_value = "product_assessment.db"
    )]
    db: PathBuf,

    /// Sales CSV file
    #[arg(long, global = true, env = "SALES_CSV_PATH", default_value = "input.csv")]
    csv: PathBuf,

    /// Defaults to `serve`
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import the CSV, then serve the reporting API with background refresh
    Serve(ServeArgs),
    /// Import the CSV once and exit
    Import,
    /// Back up the database once and exit
    Backup {
        /// Number of backups to keep (older ones are deleted)
        #[arg(long)]
        keep_backups: Option<usize>,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Seconds between backup and CSV re-import
    #[arg(long, default_value_t = DEFAULT_REFRESH_SECS)]
    refresh_secs: u64,
    /// Number of backups to keep (older ones are deleted)
    #[arg(long)]
    keep_backups: Option<usize>,
    /// Serve only; skip the background backup/refresh loop
    #[arg(long)]
    no_refresh: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            refresh_secs: DEFAULT_REFRESH_SECS,
            keep_backups: None,
            no_refresh: false,
        }
    }
}

#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
    refresh: Arc<RefreshProgress>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,sales_report=debug,sqlx=info")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,sales_report=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before parsing so it can feed the env-backed flags
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Serve(args)) => {
            cmd_serve(&cli.db, &cli.csv, args).await?;
        }
        None => {
            cmd_serve(&cli.db, &cli.csv, ServeArgs::default()).await?;
        }
        Some(Commands::Import) => {
            cmd_import(&cli.db, &cli.csv).await?;
        }
        Some(Commands::Backup { keep_backups }) => {
            cmd_backup(&cli.db, keep_backups).await?;
        }
    }

    Ok(())
}

async fn open_database(db_path: &Path) -> anyhow::Result<Database> {
    let db = Database::new(db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", db_path.display());
    Ok(db)
}

// ============================================================================
// Serve command — Axum web server + refresh loop
// ============================================================================

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api_health))
        .route("/refresh/status", get(api_refresh_status))
        .route("/total_revenue", get(api_total_revenue))
        .route("/total_revenue_by_product", get(api_revenue_by_product))
        .route("/total_revenue_by_category", get(api_revenue_by_category))
        .route("/total_revenue_by_region", get(api_revenue_by_region))
        .route("/revenue_trends", get(api_revenue_trends))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(cors)
        .with_state(state)
}

async fn cmd_serve(db_path: &Path, csv_path: &Path, args: ServeArgs) -> anyhow::Result<()> {
    info!("Sales Report v{} starting...", APP_VERSION);

    let db = Arc::new(open_database(db_path).await?);
    let lock = new_db_lock();
    let progress = Arc::new(RefreshProgress::new());
    let config = RefreshConfig {
        interval: Duration::from_secs(args.refresh_secs),
        keep_backups: args.keep_backups,
        ..RefreshConfig::new(csv_path)
    };

    // Existing data stays servable when the first import fails
    if let Err(e) = initial_import(&db, &lock, &progress, &config).await {
        warn!(csv = %csv_path.display(), error = %e, "Initial CSV import failed");
    }

    let refresh_handle = if args.no_refresh {
        None
    } else {
        let (db, lock, progress) = (db.clone(), lock.clone(), progress.clone());
        Some(tokio::spawn(async move {
            run_refresh_loop(&db, &lock, &progress, &config).await;
        }))
    };

    let state = AppState {
        db,
        refresh: progress.clone(),
    };
    let app = build_router(state);

    let addr: std::net::SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    println!("\n=== Sales Report v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /health                     - Health check");
    println!("  GET  /refresh/status             - Background refresh status");
    println!("  GET  /total_revenue              - Total revenue in date range");
    println!("  GET  /total_revenue_by_product   - Revenue per product");
    println!("  GET  /total_revenue_by_category  - Revenue per category");
    println!("  GET  /total_revenue_by_region    - Revenue per region");
    println!("  GET  /revenue_trends             - Revenue per month/quarter/year");
    println!("\n  Database: {}", db_path.display());
    println!("  CSV:      {}", csv_path.display());
    if args.no_refresh {
        println!("  Refresh:  disabled");
    } else {
        println!("  Refresh:  every {}s", args.refresh_secs);
    }
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(progress))
        .await?;

    if let Some(handle) = refresh_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Refresh loop task failed");
        }
    }
    info!("Sales Report stopped");

    Ok(())
}

async fn shutdown_signal(progress: Arc<RefreshProgress>) {
    tokio::signal::ctrl_c().await.ok();
    info!("Ctrl+C received, shutting down...");
    progress.cancel();
}

// ============================================================================
// Import / Backup commands
// ============================================================================

async fn cmd_import(db_path: &Path, csv_path: &Path) -> anyhow::Result<()> {
    println!("\n=== Sales Report v{} ===", APP_VERSION);

    let db = open_database(db_path).await?;
    let lock = new_db_lock();
    let summary = ingest_csv(db.pool(), csv_path, &lock)
        .await
        .map_err(|e| anyhow::anyhow!("Import failed: {}", e))?;

    let counts = SalesRepository::new(db.pool())
        .counts()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to count rows: {}", e))?;

    print_summary(&summary);
    println!(
        "\nDatabase now holds {} customers, {} products, {} orders",
        counts.customers, counts.products, counts.orders
    );
    Ok(())
}

fn print_summary(summary: &IngestSummary) {
    println!("\nImported {}", summary.csv_path);
    println!("  {:<18} {:>10}", "Rows read", summary.rows_read);
    println!("  {:<18} {:>10}", "Rows imported", summary.rows_imported);
    println!("  {:<18} {:>10}", "Rows skipped", summary.rows_skipped);
    println!("  {:<18} {:>10}", "Customers", summary.customers);
    println!("  {:<18} {:>10}", "Products", summary.products);
    println!("  {:<18} {:>10}", "Orders", summary.orders);
    match summary.revenue_imported {
        Some(revenue) => println!("  {:<18} {:>10.2}", "Revenue imported", revenue),
        None => println!("  {:<18} {:>10}", "Revenue imported", "overflow"),
    }
}

async fn cmd_backup(db_path: &Path, keep_backups: Option<usize>) -> anyhow::Result<()> {
    let db = open_database(db_path).await?;
    let lock = new_db_lock();

    let path = backup_database(&db, &lock, Local::now())
        .await
        .map_err(|e| anyhow::anyhow!("Backup failed: {}", e))?;
    println!("Database backup created: {}", path.display());

    if let Some(keep) = keep_backups {
        let removed = apply_retention(db_path, keep)
            .await
            .map_err(|e| anyhow::anyhow!("Backup retention failed: {}", e))?;
        for old in &removed {
            println!("Removed old backup: {}", old.display());
        }
    }
    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
}

fn db_failure(context: &str, e: DbError) -> ApiError {
    error!(error = %e, "{}", context);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": format!("{}: {}", context, e) })),
    )
}

/// `start_date` and `end_date` are both required and must be non-empty
fn date_range(params: &HashMap<String, String>) -> Result<DateRange, ApiError> {
    let get = |key: &str| params.get(key).filter(|v| !v.is_empty());
    match (get("start_date"), get("end_date")) {
        (Some(start), Some(end)) => Ok(DateRange::new(start.as_str(), end.as_str())),
        _ => Err(bad_request("start_date and end_date are required")),
    }
}

/// GET /health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "sales-report",
        "version": APP_VERSION,
    }))
}

/// GET /refresh/status — background refresh progress
async fn api_refresh_status(State(state): State<AppState>) -> Json<RefreshSnapshot> {
    Json(state.refresh.snapshot())
}

/// GET /total_revenue?start_date=&end_date=
async fn api_total_revenue(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let range = date_range(&params)?;
    let total = RevenueRepository::new(state.db.pool())
        .total_revenue(&range)
        .await
        .map_err(|e| db_failure("Failed to compute total revenue", e))?;

    Ok(Json(serde_json::json!({ "total_revenue": total })))
}

/// GET /total_revenue_by_product?start_date=&end_date=
async fn api_revenue_by_product(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<ProductRevenue>>, ApiError> {
    let range = date_range(&params)?;
    RevenueRepository::new(state.db.pool())
        .revenue_by_product(&range)
        .await
        .map(Json)
        .map_err(|e| db_failure("Failed to compute revenue by product", e))
}

/// GET /total_revenue_by_category?start_date=&end_date=
async fn api_revenue_by_category(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<CategoryRevenue>>, ApiError> {
    let range = date_range(&params)?;
    RevenueRepository::new(state.db.pool())
        .revenue_by_category(&range)
        .await
        .map(Json)
        .map_err(|e| db_failure("Failed to compute revenue by category", e))
}

/// GET /total_revenue_by_region?start_date=&end_date=
async fn api_revenue_by_region(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<RegionRevenue>>, ApiError> {
    let range = date_range(&params)?;
    RevenueRepository::new(state.db.pool())
        .revenue_by_region(&range)
        .await
        .map(Json)
        .map_err(|e| db_failure("Failed to compute revenue by region", e))
}

/// GET /revenue_trends?start_date=&end_date=&interval=monthly|quarterly|yearly
async fn api_revenue_trends(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<PeriodRevenue>>, ApiError> {
    let range = date_range(&params)?;
    let interval: TrendInterval = match params.get("interval") {
        Some(raw) => raw.parse().map_err(|_| bad_request("Invalid interval"))?,
        None => TrendInterval::default(),
    };

    RevenueRepository::new(state.db.pool())
        .revenue_trends(&range, interval)
        .await
        .map(Json)
        .map_err(|e| db_failure("Failed to compute revenue trends", e))
}

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, routing::get, routing::put};
use clap::{Parser, Subcommand};
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use dropwatch::config::DropwatchConfig;
use dropwatch::coordinator::{self, CycleContext};
use dropwatch::czds_client::CzdsClient;
use dropwatch::db::DropwatchDb;
use dropwatch::drop_persister::DEFAULT_BATCH_SIZE;
use dropwatch::notification::LoggingNotificationSink;
use dropwatch::quality::null_scorer;
use dropwatch::zone_parser::DEFAULT_MEMORY_BUDGET;
use dropwatch::zone_store::ZoneStore;
use dropwatch::{handlers, AppState};

/// CLI surface per spec §6: `ingest`/`catch-up`/`replay` run cycles
/// directly; `serve` exposes the read/admin HTTP API the scheduler daemon's
/// ingests feed. Exit codes follow the spec exactly: 0 success, 1 generic
/// error, 2 fatal config/auth, 3 no-baseline (informational).
#[derive(Parser)]
#[command(name = "dropwatch", about = "TLD drop tracker — ingestion core")]
struct Cli {
    #[arg(long, default_value = "dropwatch.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one ingestion cycle synchronously for a single TLD.
    Ingest {
        #[arg(long)]
        tld: String,
        #[arg(long)]
        date: Option<String>,
    },
    /// Enqueue and run missing cycles since each job's last success.
    CatchUp {
        #[arg(long)]
        horizon: Option<u32>,
    },
    /// Re-run detection from an existing snapshot; never downloads.
    Replay {
        #[arg(long)]
        tld: String,
        #[arg(long)]
        date: String,
    },
    /// Serve the collaborator HTTP API (query_drops, TLD/Job/Watchlist admin CRUD).
    Serve,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dropwatch=debug,tower_http=debug")))
        .init();

    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = match DropwatchConfig::load(&cli.config) {
        Ok(c) => c.apply_env_overrides(),
        Err(e) => {
            tracing::error!("config error: {e}");
            return 2;
        }
    };

    let db = match DropwatchDb::open(&config.data_root.db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!("failed to open database: {e}");
            return 2;
        }
    };

    match cli.command {
        Command::Ingest { tld, date } => {
            let date = date.unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());
            run_single_cycle(config, db, &tld, &date, true).await
        }
        Command::Replay { tld, date } => run_single_cycle(config, db, &tld, &date, false).await,
        Command::CatchUp { horizon } => run_catch_up(config, db, horizon).await,
        Command::Serve => {
            if let Err(e) = serve(db).await {
                tracing::error!("server error: {e}");
                return 1;
            }
            0
        }
    }
}

fn build_context(config: &DropwatchConfig, db: Arc<DropwatchDb>) -> anyhow::Result<CycleContext> {
    let zone_store = Arc::new(ZoneStore::new(&config.data_root.path, db.clone()));
    let czds = Arc::new(CzdsClient::new(config.czds.clone())?);
    Ok(CycleContext {
        db,
        zone_store,
        czds,
        scorer: null_scorer(),
        sink: Arc::new(LoggingNotificationSink),
        memory_budget: DEFAULT_MEMORY_BUDGET,
        batch_size: DEFAULT_BATCH_SIZE,
    })
}

async fn run_single_cycle(
    config: DropwatchConfig,
    db: Arc<DropwatchDb>,
    tld: &str,
    date: &str,
    download_if_missing: bool,
) -> i32 {
    let ctx = match build_context(&config, db) {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("failed to build ingestion context: {e}");
            return 2;
        }
    };

    let cancel = CancellationToken::new();
    match coordinator::run(&ctx, tld, date, &cancel, download_if_missing).await {
        Ok(outcome) if outcome.no_baseline => {
            tracing::info!(tld, date, "cycle finished: no baseline snapshot");
            3
        }
        Ok(outcome) => {
            tracing::info!(
                tld,
                date,
                drops_detected = outcome.stats.drops_detected,
                drops_inserted = outcome.stats.drops_inserted,
                "cycle finished"
            );
            0
        }
        Err(e) => {
            tracing::error!("cycle failed: {e}");
            exit_code_for_error(&e)
        }
    }
}

fn exit_code_for_error(e: &dropwatch::error::DropwatchError) -> i32 {
    use dropwatch::error::DropwatchError::*;
    match e {
        Config(_) => 2,
        FatalIo(msg) if msg.contains("401") || msg.contains("403") || msg.contains("not authorized") => 2,
        _ => 1,
    }
}

async fn run_catch_up(config: DropwatchConfig, db: Arc<DropwatchDb>, horizon: Option<u32>) -> i32 {
    let ctx = match build_context(&config, db.clone()) {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            tracing::error!("failed to build ingestion context: {e}");
            return 2;
        }
    };
    let horizon = horizon.unwrap_or(config.scheduler.catchup_horizon_days);
    let runner = dropwatch::scheduler::JobRunner::new(db, ctx, config.scheduler.workers, horizon);
    match runner.run_catch_up().await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("catch-up failed: {e}");
            1
        }
    }
}

async fn serve(db: Arc<DropwatchDb>) -> anyhow::Result<()> {
    let state = AppState { db };

    let app = Router::new()
        .route("/api/v1/drops", get(handlers::drops::query_drops))
        .route(
            "/api/v1/tlds",
            get(handlers::tlds::list_tlds).post(handlers::tlds::upsert_tld),
        )
        .route("/api/v1/tlds/{name}", get(handlers::tlds::get_tld))
        .route(
            "/api/v1/jobs",
            get(handlers::jobs::list_jobs).post(handlers::jobs::upsert_job),
        )
        .route("/api/v1/jobs/{id}", get(handlers::jobs::get_job))
        .route("/api/v1/job-runs", get(handlers::jobs::list_job_runs))
        .route(
            "/api/v1/watchlists",
            get(handlers::watchlists::list_watchlists).post(handlers::watchlists::create_watchlist),
        )
        .route(
            "/api/v1/watchlists/{id}",
            get(handlers::watchlists::get_watchlist).delete(handlers::watchlists::delete_watchlist),
        )
        .route(
            "/api/v1/watchlists/{id}/activate",
            put(handlers::watchlists::activate_watchlist),
        )
        .route("/healthz", get(handlers::health::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!("dropwatch-api listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use dropwatch::config::DropwatchConfig;
use dropwatch::coordinator::CycleContext;
use dropwatch::czds_client::CzdsClient;
use dropwatch::db::DropwatchDb;
use dropwatch::drop_persister::DEFAULT_BATCH_SIZE;
use dropwatch::notification::LoggingNotificationSink;
use dropwatch::quality::null_scorer;
use dropwatch::scheduler::JobRunner;
use dropwatch::zone_parser::DEFAULT_MEMORY_BUDGET;
use dropwatch::zone_store::ZoneStore;

/// The long-running daemon side of the scheduler (spec §4.6): on startup,
/// coalesce missed ticks since each job's last success, then hand off to
/// the cron dispatch loop that enqueues tickets as schedules fire. Grounded
/// on `src/bin/anomaly_engine.rs`'s env-loading + single long-lived
/// background task shape.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dropwatch=debug")))
        .init();

    let config_path = std::env::var("DROPWATCH_CONFIG").unwrap_or_else(|_| "dropwatch.toml".to_string());
    let config = DropwatchConfig::load(&config_path)?.apply_env_overrides();

    let db = Arc::new(DropwatchDb::open(&config.data_root.db_path)?);
    tracing::info!(db_path = %config.data_root.db_path, "dropwatch db opened");

    let zone_store = Arc::new(ZoneStore::new(&config.data_root.path, db.clone()));
    let czds = Arc::new(CzdsClient::new(config.czds.clone())?);
    let ctx = Arc::new(CycleContext {
        db: db.clone(),
        zone_store,
        czds,
        scorer: null_scorer(),
        sink: Arc::new(LoggingNotificationSink),
        memory_budget: DEFAULT_MEMORY_BUDGET,
        batch_size: DEFAULT_BATCH_SIZE,
    });

    let runner = JobRunner::new(
        db,
        ctx,
        config.scheduler.workers,
        config.scheduler.catchup_horizon_days,
    );

    tracing::info!("dropwatch-scheduler: running startup catch-up");
    if let Err(e) = runner.run_catch_up().await {
        tracing::error!("startup catch-up failed: {e}");
    }

    tracing::info!("dropwatch-scheduler: entering cron dispatch loop");
    runner.run_forever().await;

    Ok(())
}

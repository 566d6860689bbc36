use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::czds_client::CzdsClient;
use crate::db::DropwatchDb;
use crate::drop_detector;
use crate::drop_persister;
use crate::error::{DropwatchError, Result};
use crate::models::drop_record::DropRecord;
use crate::models::job::JobRunStats;
use crate::notification::NotificationSink;
use crate::quality::QualityScorer;
use crate::watchlist_matcher::{self, WatchlistIndex};
use crate::zone_parser;
use crate::zone_store::ZoneStore;

/// Collects everything the coordinator needs that isn't per-call: the
/// external collaborators (§2 data flow) plus the tunables spec §4.3/§4.5
/// expose as defaults. One `CycleContext` is shared across many `(tld,
/// date)` runs by the scheduler's worker pool.
pub struct CycleContext {
    pub db: Arc<DropwatchDb>,
    pub zone_store: Arc<ZoneStore>,
    pub czds: Arc<CzdsClient>,
    pub scorer: QualityScorer,
    pub sink: Arc<dyn NotificationSink>,
    pub memory_budget: usize,
    pub batch_size: usize,
}

/// What a single `(tld, date)` cycle produced. `no_baseline` distinguishes
/// the "first ever ingest for this TLD" success case (spec §4.4 step 1 /
/// §7 `MissingBaseline`) from an ordinary run with zero drops.
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub stats: JobRunStats,
    pub no_baseline: bool,
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(DropwatchError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run one `(fetch → parse → detect → persist → match)` cycle for `tld` on
/// `date` (spec §4.8). Lease acquisition/release and `JobRun` bookkeeping
/// are the caller's responsibility (scheduler or CLI) so this function
/// stays pure business logic, directly unit-testable without a scheduler in
/// the loop. `download_if_missing = false` is what `replay` uses: it skips
/// step 3 entirely and fails loudly if the snapshot isn't already there.
pub async fn run(
    ctx: &CycleContext,
    tld: &str,
    date: &str,
    cancel: &CancellationToken,
    download_if_missing: bool,
) -> Result<CycleOutcome> {
    let mut stats = JobRunStats::default();

    check_cancelled(cancel)?;
    if !ctx.zone_store.exists(tld, date)? {
        if !download_if_missing {
            return Err(DropwatchError::FatalIo(format!(
                "no snapshot for {tld}/{date} and downloads are disabled for this run"
            )));
        }
        stats.bytes_downloaded = fetch_snapshot(ctx, tld, date, cancel).await?;
    }

    check_cancelled(cancel)?;
    let Some(baseline_date) = ctx.zone_store.latest_before(tld, date)? else {
        tracing::info!(tld, date, "no baseline snapshot, ending cycle with zero drops");
        return Ok(CycleOutcome {
            stats,
            no_baseline: true,
        });
    };

    check_cancelled(cancel)?;
    let prev = parse_snapshot(ctx, tld, &baseline_date)?;
    check_cancelled(cancel)?;
    let today = parse_snapshot(ctx, tld, date)?;
    stats.labels_parsed = prev.len() + today.len();

    check_cancelled(cancel)?;
    let scorer = &ctx.scorer;
    let mut memo = drop_detector::MemoizedScorer::new(scorer.as_ref());
    let records: Vec<DropRecord> =
        drop_detector::detect(prev, today, tld, date, |label, tld| memo.score(label, tld))?;
    stats.drops_detected = records.len() as u64;

    check_cancelled(cancel)?;
    let persisted = drop_persister::persist(&ctx.db, tld, date, &records, ctx.batch_size)?;
    stats.drops_inserted = persisted.inserted;

    check_cancelled(cancel)?;
    let index = WatchlistIndex::load(&ctx.db)
        .map_err(|e| DropwatchError::FatalIo(format!("loading watchlist index: {e}")))?;
    if !index.is_empty() {
        let paired: Vec<(i64, DropRecord)> = persisted.ids.into_iter().zip(records).collect();
        watchlist_matcher::match_and_notify(&ctx.db, &index, &paired, ctx.sink.as_ref())
            .map_err(|e| DropwatchError::FatalIo(format!("watchlist matching: {e}")))?;
    }

    Ok(CycleOutcome {
        stats,
        no_baseline: false,
    })
}

/// Map a CZDS client error into the right `DropwatchError` variant,
/// preserving the fatal/transient distinction `czds_client::is_fatal`
/// computes from the HTTP status (spec §4.2/§7: 401/403/404 are fatal, the
/// rest retry). Coordinator-local context (e.g. "a 404 means the TLD isn't
/// authorized") is still caught by `is_fatal`'s string match since it only
/// inspects the underlying status classification, not the wrapping message.
fn classify_czds_error(context: &str, e: anyhow::Error) -> DropwatchError {
    if crate::czds_client::is_fatal(&e) {
        DropwatchError::FatalIo(format!("{context}: {e}"))
    } else {
        DropwatchError::TransientIo(format!("{context}: {e}"))
    }
}

async fn fetch_snapshot(
    ctx: &CycleContext,
    tld: &str,
    date: &str,
    cancel: &CancellationToken,
) -> Result<u64> {
    let zones = ctx
        .czds
        .list_zones()
        .await
        .map_err(|e| classify_czds_error("listing CZDS zones", e))?;
    let listing = zones
        .into_iter()
        .find(|z| z.tld == tld)
        .ok_or_else(|| DropwatchError::FatalIo(format!("tld '{tld}' not authorized in CZDS catalog")))?;

    check_cancelled(cancel)?;
    let head = ctx
        .czds
        .head_zone(&listing.url)
        .await
        .map_err(|e| classify_czds_error(&format!("HEAD {}", listing.url), e))?;

    let handle = ctx.zone_store.reserve(tld, date)?;
    check_cancelled(cancel)?;
    let outcome = ctx
        .czds
        .download_zone(&listing.url, &handle, &head)
        .await
        .map_err(|e| classify_czds_error(&format!("downloading {}", listing.url), e))?;

    if let Some(expected) = head.size {
        if expected != outcome.bytes {
            return Err(DropwatchError::FatalIo(format!(
                "size mismatch for {tld}/{date}: expected {expected}, got {}",
                outcome.bytes
            )));
        }
    }

    ctx.zone_store.commit(handle, outcome.bytes, outcome.sha256)?;
    Ok(outcome.bytes)
}

fn parse_snapshot(ctx: &CycleContext, tld: &str, date: &str) -> Result<zone_parser::LabelSet> {
    let reader = ctx.zone_store.open(tld, date)?;
    match zone_parser::parse_labels(reader, tld, ctx.memory_budget) {
        Ok(labels) => Ok(labels),
        Err(e) => {
            ctx.zone_store.quarantine(tld, date)?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::null_scorer;
    use std::io::Write;

    fn write_zone(store: &ZoneStore, tld: &str, date: &str, body: &str) {
        let handle = store.reserve(tld, date).unwrap();
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        gz.write_all(body.as_bytes()).unwrap();
        let compressed = gz.finish().unwrap();
        std::fs::write(handle.partial_path(), &compressed).unwrap();
        let sha = {
            use sha2::{Digest, Sha256};
            format!("{:x}", Sha256::digest(&compressed))
        };
        store.commit(handle, compressed.len() as u64, sha).unwrap();
    }

    fn ctx(db: Arc<DropwatchDb>, store: Arc<ZoneStore>) -> CycleContext {
        CycleContext {
            db,
            zone_store: store,
            czds: Arc::new(CzdsClient::new(crate::config::CzdsConfig::default()).unwrap()),
            scorer: null_scorer(),
            sink: Arc::new(crate::notification::LoggingNotificationSink),
            memory_budget: zone_parser::DEFAULT_MEMORY_BUDGET,
            batch_size: drop_persister::DEFAULT_BATCH_SIZE,
        }
    }

    #[tokio::test]
    async fn no_baseline_ends_success_with_zero_drops() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        db.upsert_tld("app", "app", true).unwrap();
        let store = Arc::new(ZoneStore::new(dir.path(), db.clone()));
        write_zone(&store, "app", "2025-02-10", "alpha.app. NS ns1.\n");

        let c = ctx(db, store);
        let cancel = CancellationToken::new();
        let outcome = run(&c, "app", "2025-02-10", &cancel, false).await.unwrap();
        assert!(outcome.no_baseline);
        assert_eq!(outcome.stats.drops_detected, 0);
    }

    #[tokio::test]
    async fn detects_and_persists_drop_between_adjacent_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        db.upsert_tld("dev", "dev", true).unwrap();
        let store = Arc::new(ZoneStore::new(dir.path(), db.clone()));
        write_zone(&store, "dev", "2025-01-01", "alpha.dev. NS ns1.\nbeta.dev. NS ns1.\n");
        write_zone(&store, "dev", "2025-01-02", "alpha.dev. NS ns1.\n");

        let c = ctx(db.clone(), store);
        let cancel = CancellationToken::new();
        let outcome = run(&c, "dev", "2025-01-02", &cancel, false).await.unwrap();
        assert!(!outcome.no_baseline);
        assert_eq!(outcome.stats.drops_detected, 1);
        assert_eq!(outcome.stats.drops_inserted, 1);

        let drops = db
            .query_drops(&crate::db::DropQueryFilter::paged(1, 10))
            .unwrap();
        assert_eq!(drops.len(), 1);
        assert_eq!(drops[0].label, "beta");
    }

    #[tokio::test]
    async fn cancellation_before_start_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        let store = Arc::new(ZoneStore::new(dir.path(), db.clone()));
        let c = ctx(db, store);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run(&c, "dev", "2025-01-02", &cancel, true).await;
        assert!(matches!(result, Err(DropwatchError::Cancelled)));
    }

    #[test]
    fn classify_czds_error_maps_fatal_and_transient() {
        let fatal = anyhow::anyhow!("fatal:404 tld not found");
        let transient = anyhow::anyhow!("connection reset");
        assert!(matches!(
            classify_czds_error("listing CZDS zones", fatal),
            DropwatchError::FatalIo(_)
        ));
        assert!(matches!(
            classify_czds_error("listing CZDS zones", transient),
            DropwatchError::TransientIo(_)
        ));
    }
}

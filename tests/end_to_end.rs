//! Wires the pipeline together against a temp zone store + in-memory db,
//! the integration-test idiom the teacher uses for anything that can't be
//! exercised as a pure unit (see `tests/alert_pipeline.rs` upstream). Unit
//! tests inside each module cover the algorithms in isolation; these cover
//! the seams between them.

use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use dropwatch::config::CzdsConfig;
use dropwatch::coordinator::{self, CycleContext};
use dropwatch::czds_client::CzdsClient;
use dropwatch::db::{DropQueryFilter, DropwatchDb};
use dropwatch::drop_persister::{self, DEFAULT_BATCH_SIZE};
use dropwatch::models::job::{Job, JobKind, JobOutcome};
use dropwatch::models::watchlist::{PatternKind, WatchlistUpsert};
use dropwatch::notification::LoggingNotificationSink;
use dropwatch::quality::null_scorer;
use dropwatch::scheduler::JobRunner;
use dropwatch::zone_parser::DEFAULT_MEMORY_BUDGET;
use dropwatch::zone_store::ZoneStore;

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

fn fresh_context(db: Arc<DropwatchDb>, store: Arc<ZoneStore>) -> CycleContext {
    CycleContext {
        db,
        zone_store: store,
        czds: Arc::new(CzdsClient::new(CzdsConfig::default()).unwrap()),
        scorer: null_scorer(),
        sink: Arc::new(LoggingNotificationSink),
        memory_budget: DEFAULT_MEMORY_BUDGET,
        batch_size: DEFAULT_BATCH_SIZE,
    }
}

/// S2: running `replay` twice over the same snapshot pair produces the same
/// stored rows, not duplicates — the unique `(label, tld, drop_date)`
/// constraint plus `ON CONFLICT DO NOTHING` makes the second pass a no-op.
#[tokio::test]
async fn replaying_a_cycle_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
    db.upsert_tld("xyz", "xyz", true).unwrap();
    let store = Arc::new(ZoneStore::new(dir.path(), db.clone()));
    write_zone(&store, "xyz", "2025-03-01", "alpha.xyz. NS ns1.\nbeta.xyz. NS ns1.\ngamma.xyz. NS ns1.\n");
    write_zone(&store, "xyz", "2025-03-02", "alpha.xyz. NS ns1.\n");

    let ctx = fresh_context(db.clone(), store);
    let cancel = CancellationToken::new();

    let first = coordinator::run(&ctx, "xyz", "2025-03-02", &cancel, false).await.unwrap();
    assert_eq!(first.stats.drops_detected, 2);
    assert_eq!(first.stats.drops_inserted, 2);

    let second = coordinator::run(&ctx, "xyz", "2025-03-02", &cancel, false).await.unwrap();
    assert_eq!(second.stats.drops_detected, 2);
    assert_eq!(second.stats.drops_inserted, 0, "replay must not double-insert");

    let drops = db.query_drops(&DropQueryFilter::paged(1, 10)).unwrap();
    assert_eq!(drops.len(), 2);
    let mut labels: Vec<_> = drops.iter().map(|d| d.label.as_str()).collect();
    labels.sort();
    assert_eq!(labels, vec!["beta", "gamma"]);
}

/// S6: a watchlist with an active pattern picks up a drop detected in the
/// same cycle that created it, end to end through the coordinator.
#[tokio::test]
async fn watchlist_matches_drop_detected_in_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
    db.upsert_tld("app", "app", true).unwrap();
    let store = Arc::new(ZoneStore::new(dir.path(), db.clone()));
    write_zone(&store, "app", "2025-04-01", "shortname.app. NS ns1.\nzz.app. NS ns1.\n");
    write_zone(&store, "app", "2025-04-02", "shortname.app. NS ns1.\n");

    let watchlist_id = "wl-1".to_string();
    db.create_watchlist(
        &watchlist_id,
        &WatchlistUpsert {
            user_id: "user-1".to_string(),
            pattern_kind: PatternKind::Prefix,
            pattern: "zz".to_string(),
            min_length: None,
            max_length: None,
            allowed_tlds: vec![],
            allowed_charsets: vec![],
            min_quality: None,
        },
    )
    .unwrap();

    let ctx = fresh_context(db.clone(), store);
    let cancel = CancellationToken::new();
    let outcome = coordinator::run(&ctx, "app", "2025-04-02", &cancel, false).await.unwrap();
    assert_eq!(outcome.stats.drops_detected, 1);

    let matched_ids = db.list_matches_for_watchlist(&watchlist_id).unwrap();
    assert_eq!(matched_ids.len(), 1);

    let drops = db.query_drops(&DropQueryFilter::paged(1, 10)).unwrap();
    assert_eq!(drops[0].label, "zz");
}

/// S5: two concurrent attempts to run the same `(tld, date, kind)` ticket
/// race for the lease; exactly one reaches a terminal run, the other is
/// skipped outright rather than duplicating work.
#[tokio::test]
async fn concurrent_tickets_for_same_target_single_flight() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
    db.upsert_tld("net", "net", true).unwrap();
    let store = Arc::new(ZoneStore::new(dir.path(), db.clone()));
    write_zone(&store, "net", "2025-05-01", "one.net. NS ns1.\ntwo.net. NS ns1.\n");
    write_zone(&store, "net", "2025-05-02", "one.net. NS ns1.\n");

    let ctx = Arc::new(fresh_context(db.clone(), store));
    let runner = Arc::new(JobRunner::new(db.clone(), ctx, 4, 30));

    let job = Job {
        id: "job-net-ingest".to_string(),
        tld: "net".to_string(),
        kind: JobKind::Ingest,
        schedule: "0 3 * * *".to_string(),
        is_enabled: true,
        timeout_secs: 60,
        max_retries: 0,
        backoff_base_secs: 1,
        backoff_cap_secs: 1,
    };
    db.upsert_job(&job).unwrap();

    let runner_a = runner.clone();
    let job_a = job.clone();
    let runner_b = runner.clone();
    let job_b = job.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { runner_a.run_one(&job_a, "2025-05-02").await }),
        tokio::spawn(async move { runner_b.run_one(&job_b, "2025-05-02").await }),
    );
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    let outcomes = [a, b];
    let successes = outcomes.iter().filter(|o| **o == JobOutcome::Success).count();
    let skipped = outcomes.iter().filter(|o| **o == JobOutcome::Skipped).count();
    assert_eq!(successes, 1, "exactly one racer should complete the cycle");
    assert_eq!(skipped, 1, "the other racer should be skipped, not retried or duplicated");

    let drops = db.query_drops(&DropQueryFilter::paged(1, 10)).unwrap();
    assert_eq!(drops.len(), 1);
    assert_eq!(drops[0].label, "two");
}

/// S3 variant: a catch-up run correctly coalesces several missed days into
/// one ticket per day and persists all of them, not just the latest.
#[tokio::test]
async fn catch_up_enqueues_one_ticket_per_missed_day() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
    db.upsert_tld("io", "io", true).unwrap();
    let store = Arc::new(ZoneStore::new(dir.path(), db.clone()));
    write_zone(&store, "io", "2025-06-01", "a.io. NS ns1.\nb.io. NS ns1.\nc.io. NS ns1.\n");
    write_zone(&store, "io", "2025-06-02", "a.io. NS ns1.\nb.io. NS ns1.\n");
    write_zone(&store, "io", "2025-06-03", "a.io. NS ns1.\n");

    // Horizon of 2 pins the earliest allowed ticket to 06-01, matching the
    // oldest snapshot on disk, so every ticket has a baseline already
    // present and none of them trigger a live download attempt.
    let ctx = Arc::new(fresh_context(db.clone(), store));
    let runner = JobRunner::new(db.clone(), ctx, 4, 2);

    let job = Job {
        id: "job-io-ingest".to_string(),
        tld: "io".to_string(),
        kind: JobKind::Ingest,
        schedule: "0 3 * * *".to_string(),
        is_enabled: true,
        timeout_secs: 60,
        max_retries: 0,
        backoff_base_secs: 1,
        backoff_cap_secs: 1,
    };
    db.upsert_job(&job).unwrap();

    let today = chrono::NaiveDate::from_ymd_opt(2025, 6, 3).unwrap();
    let tickets = runner.catch_up_tickets(&[job.clone()], today).unwrap();
    assert_eq!(tickets.len(), 3, "days 1 through 3 are all unattempted so far");

    for (job, date) in tickets {
        let outcome = runner.run_one(&job, &date.format("%Y-%m-%d").to_string()).await.unwrap();
        assert_eq!(outcome, JobOutcome::Success);
    }

    // Day 1 has no baseline (zero drops); day 2 drops "c"; day 3 drops "b".
    let drops = db.query_drops(&DropQueryFilter::paged(1, 10)).unwrap();
    assert_eq!(drops.len(), 2);
    let mut labels: Vec<_> = drops.iter().map(|d| d.label.as_str()).collect();
    labels.sort();
    assert_eq!(labels, vec!["b", "c"]);

    let remaining_tickets = runner.catch_up_tickets(&[job], today).unwrap();
    assert!(remaining_tickets.is_empty(), "catch-up horizon should now be fully caught up");
}

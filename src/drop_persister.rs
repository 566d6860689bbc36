use std::sync::Arc;

use crate::db::DropwatchDb;
use crate::error::{DropwatchError, Result};
use crate::models::drop_record::DropRecord;

/// Records batched by a single `persist` call default to this size
/// (spec §4.5: "default 5,000 per transaction").
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Outcome of a persist cycle: totals plus the row ids of every record
/// touched (inserted or already-present), in input order — the watchlist
/// matcher needs the ids of records it must evaluate, including ones a
/// retried cycle re-discovers as already persisted.
#[derive(Debug, Clone, Default)]
pub struct PersistOutcome {
    pub inserted: u64,
    pub skipped: u64,
    pub ids: Vec<i64>,
}

/// Idempotent batch writer (spec §4.5). Batches `records` into transactions
/// of `batch_size`, relying on the `(label, tld, drop_date)` unique
/// constraint for the insert-if-not-exists semantics. On success, updates
/// the TLD's `last_import_date`/`last_drop_count` markers — never before,
/// so a cycle that fails partway through leaves the TLD markers at their
/// last known-good values and a retry picks up where the unique constraint
/// left off (spec invariant 2, invariant 4). `last_drop_count` is recorded
/// as `records.len()`, the cycle's total detected count, so a zero-insert
/// replay (which re-detects the same records) leaves it unchanged rather
/// than zeroing it out (S2).
pub fn persist(
    db: &Arc<DropwatchDb>,
    tld: &str,
    date: &str,
    records: &[DropRecord],
    batch_size: usize,
) -> Result<PersistOutcome> {
    let batch_size = batch_size.max(1);
    let mut outcome = PersistOutcome::default();

    for chunk in records.chunks(batch_size) {
        let (inserted, skipped, ids) = db
            .insert_drops_batch(chunk)
            .map_err(|e| DropwatchError::FatalIo(format!("persisting drop batch: {e}")))?;
        outcome.inserted += inserted;
        outcome.skipped += skipped;
        outcome.ids.extend(ids);
    }

    db.mark_cycle_success(tld, date, records.len() as i64)
        .map_err(|e| DropwatchError::FatalIo(format!("marking cycle success: {e}")))?;

    Ok(outcome)
}

/// Convenience wrapper using the module default batch size.
pub fn persist_default(
    db: &Arc<DropwatchDb>,
    tld: &str,
    date: &str,
    records: &[DropRecord],
) -> Result<PersistOutcome> {
    persist(db, tld, date, records, DEFAULT_BATCH_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::drop_record::DropRecord;

    fn record(label: &str) -> DropRecord {
        DropRecord::new(label.to_string(), "dev".to_string(), "2025-01-02".to_string(), None)
    }

    #[test]
    fn idempotent_replay_yields_zero_net_changes() {
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        db.upsert_tld("dev", "dev", true).unwrap();
        let records = vec![record("alpha"), record("beta")];

        let first = persist_default(&db, "dev", "2025-01-02", &records).unwrap();
        assert_eq!((first.inserted, first.skipped), (2, 0));

        let second = persist_default(&db, "dev", "2025-01-02", &records).unwrap();
        assert_eq!((second.inserted, second.skipped), (0, 2));

        let tld = db.get_tld("dev").unwrap().unwrap();
        assert_eq!(tld.last_drop_count, 2, "a zero-insert replay must not clobber the prior recorded count");
    }

    /// Spec S2 literally: a single-record cycle replayed a second time
    /// reports `inserted=0, skipped=1` and leaves `last_drop_count` at `1`,
    /// not reset to the replay's own zero insert count.
    #[test]
    fn replay_of_single_drop_preserves_last_drop_count() {
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        db.upsert_tld("dev", "dev", true).unwrap();
        let records = vec![record("alpha")];

        let first = persist_default(&db, "dev", "2025-01-02", &records).unwrap();
        assert_eq!((first.inserted, first.skipped), (1, 0));

        let second = persist_default(&db, "dev", "2025-01-02", &records).unwrap();
        assert_eq!((second.inserted, second.skipped), (0, 1));

        let tld = db.get_tld("dev").unwrap().unwrap();
        assert_eq!(tld.last_drop_count, 1);
    }

    /// A genuine zero-drop cycle (nothing detected at all, as opposed to a
    /// replay re-detecting the same records) must still reset
    /// `last_drop_count` to zero rather than freezing at the prior value.
    #[test]
    fn genuine_zero_drop_cycle_resets_count() {
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        db.upsert_tld("dev", "dev", true).unwrap();

        let first = persist_default(&db, "dev", "2025-01-02", &[record("alpha"), record("beta")]).unwrap();
        assert_eq!((first.inserted, first.skipped), (2, 0));
        assert_eq!(db.get_tld("dev").unwrap().unwrap().last_drop_count, 2);

        let second = persist_default(&db, "dev", "2025-01-03", &[]).unwrap();
        assert_eq!((second.inserted, second.skipped), (0, 0));
        assert_eq!(db.get_tld("dev").unwrap().unwrap().last_drop_count, 0);
    }

    #[test]
    fn batches_respect_batch_size() {
        let db = Arc::new(DropwatchDb::open_in_memory().unwrap());
        db.upsert_tld("dev", "dev", true).unwrap();
        let records: Vec<_> = (0..23).map(|i| record(&format!("label{i}"))).collect();
        let outcome = persist(&db, "dev", "2025-01-02", &records, 5).unwrap();
        assert_eq!(outcome.inserted, 23);
        assert_eq!(outcome.ids.len(), 23);
    }
}

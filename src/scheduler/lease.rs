use std::sync::Arc;

use crate::db::DropwatchDb;
use crate::models::job::JobKind;

/// RAII-ish lease guard. Acquire via [`try_acquire`]; call [`release`]
/// explicitly once the run reaches a terminal state (spec §5: "release on
/// terminal transition"). Not releasing on drop is deliberate — a crashed
/// worker should leave evidence for an operator rather than silently
/// freeing a lease mid-write; recovery is an external concern here.
pub struct Lease {
    db: Arc<DropwatchDb>,
    tld: String,
    target_date: String,
    kind: JobKind,
}

impl Lease {
    pub fn release(self) -> anyhow::Result<()> {
        self.db.release_lease(&self.tld, &self.target_date, self.kind)
    }
}

/// Single atomic insert on `(tld, target_date, kind)`. Returns `None` if the
/// lease is already held — callers record a `skipped` JobRun in that case.
pub fn try_acquire(
    db: Arc<DropwatchDb>,
    tld: &str,
    target_date: &str,
    kind: JobKind,
    job_run_id: i64,
) -> anyhow::Result<Option<Lease>> {
    let acquired = db.acquire_lease(tld, target_date, kind, job_run_id)?;
    if !acquired {
        return Ok(None);
    }
    Ok(Some(Lease {
        db,
        tld: tld.to_string(),
        target_date: target_date.to_string(),
        kind,
    }))
}

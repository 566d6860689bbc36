use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

use crate::db::DropwatchDb;
use crate::error::{DropwatchError, Result};
use crate::models::zone_snapshot::ZoneSnapshot;

/// Filesystem-backed, content-addressed snapshot store. Layout is canonical:
/// `<root>/<tld>/<YYYYMMDD>.zone[.gz]` (spec §4.1/§6). A snapshot is only
/// observable to readers after `commit` publishes it; a crash mid-download
/// leaves only a `.partial` file that `reserve` overwrites on the next try.
pub struct ZoneStore {
    root: PathBuf,
    db: std::sync::Arc<DropwatchDb>,
}

/// A reserved, in-progress write target. Holding one guarantees exclusive
/// ownership of the `(tld, date)` slot until `commit` or drop.
pub struct ReserveHandle {
    tld: String,
    date: String,
    partial_path: PathBuf,
    final_path: PathBuf,
}

impl ReserveHandle {
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }
}

impl ZoneStore {
    pub fn new(root: impl Into<PathBuf>, db: std::sync::Arc<DropwatchDb>) -> Self {
        Self {
            root: root.into(),
            db,
        }
    }

    fn tld_dir(&self, tld: &str) -> PathBuf {
        self.root.join(tld)
    }

    fn final_path(&self, tld: &str, date: &str) -> PathBuf {
        self.tld_dir(tld).join(format!("{date}.zone.gz"))
    }

    pub fn exists(&self, tld: &str, date: &str) -> Result<bool> {
        Ok(self
            .db
            .get_snapshot(tld, date)
            .map_err(|e| DropwatchError::FatalIo(e.to_string()))?
            .is_some())
    }

    /// Fails with a `FatalIo` wrapping `AlreadyExists` semantics if a
    /// complete snapshot already exists for `(tld, date)`.
    pub fn reserve(&self, tld: &str, date: &str) -> Result<ReserveHandle> {
        if self.exists(tld, date)? {
            return Err(DropwatchError::FatalIo(format!(
                "snapshot already exists for {tld}/{date}"
            )));
        }
        let dir = self.tld_dir(tld);
        std::fs::create_dir_all(&dir)
            .map_err(|e| DropwatchError::FatalIo(format!("mkdir {}: {e}", dir.display())))?;
        let final_path = self.final_path(tld, date);
        let partial_path = final_path.with_extension("gz.partial");
        Ok(ReserveHandle {
            tld: tld.to_string(),
            date: date.to_string(),
            partial_path,
            final_path,
        })
    }

    /// Atomically publish the snapshot: rename the partial file into place
    /// and record its metadata. No partial-file state is ever observable to
    /// `open`/`exists` callers (spec testable property 5).
    pub fn commit(&self, handle: ReserveHandle, size: u64, sha256: String) -> Result<ZoneSnapshot> {
        std::fs::rename(&handle.partial_path, &handle.final_path).map_err(|e| {
            DropwatchError::FatalIo(format!(
                "rename {} -> {}: {e}",
                handle.partial_path.display(),
                handle.final_path.display()
            ))
        })?;
        let snapshot = ZoneSnapshot {
            tld: handle.tld,
            date: handle.date,
            path: handle.final_path.to_string_lossy().to_string(),
            size_bytes: size,
            sha256,
            fetched_at: chrono::Utc::now().to_rfc3339(),
        };
        self.db
            .record_snapshot(&snapshot)
            .map_err(|e| DropwatchError::FatalIo(e.to_string()))?;
        Ok(snapshot)
    }

    /// Quarantine a committed snapshot that failed to parse, per spec §7
    /// ParserError handling: rename with a `.bad` suffix and drop the
    /// metadata row so the cycle treats it as absent on retry.
    pub fn quarantine(&self, tld: &str, date: &str) -> Result<()> {
        if let Some(snap) = self
            .db
            .get_snapshot(tld, date)
            .map_err(|e| DropwatchError::FatalIo(e.to_string()))?
        {
            let bad_path = format!("{}.bad", snap.path);
            let _ = std::fs::rename(&snap.path, &bad_path);
            self.db
                .delete_snapshot(tld, date)
                .map_err(|e| DropwatchError::FatalIo(e.to_string()))?;
        }
        Ok(())
    }

    /// Lazy byte stream, transparently gzip-decompressing.
    pub fn open(&self, tld: &str, date: &str) -> Result<Box<dyn Read + Send>> {
        let snap = self
            .db
            .get_snapshot(tld, date)
            .map_err(|e| DropwatchError::FatalIo(e.to_string()))?
            .ok_or_else(|| DropwatchError::MissingBaseline {
                tld: tld.to_string(),
                date: date.to_string(),
            })?;
        let file = std::fs::File::open(&snap.path)
            .map_err(|e| DropwatchError::FatalIo(format!("open {}: {e}", snap.path)))?;
        let reader = BufReader::new(file);
        if snap.path.ends_with(".gz") {
            Ok(Box::new(GzDecoder::new(reader)))
        } else {
            Ok(Box::new(reader))
        }
    }

    /// Most recent snapshot date strictly before `date`.
    pub fn latest_before(&self, tld: &str, date: &str) -> Result<Option<String>> {
        self.db
            .latest_before(tld, date)
            .map_err(|e| DropwatchError::FatalIo(e.to_string()))
    }

    /// Keep only the `keep` most recent snapshots per TLD (§4.1 retention,
    /// default floor of 2 for adjacent-day diff correctness).
    pub fn prune(&self, tld: &str, keep: usize) -> Result<usize> {
        let keep = keep.max(2);
        let mut dates = self
            .db
            .list_snapshot_dates(tld)
            .map_err(|e| DropwatchError::FatalIo(e.to_string()))?;
        dates.sort_by(|a, b| b.cmp(a));
        let mut pruned = 0;
        for date in dates.into_iter().skip(keep) {
            if let Some(snap) = self
                .db
                .get_snapshot(tld, &date)
                .map_err(|e| DropwatchError::FatalIo(e.to_string()))?
            {
                let _ = std::fs::remove_file(&snap.path);
            }
            self.db
                .delete_snapshot(tld, &date)
                .map_err(|e| DropwatchError::FatalIo(e.to_string()))?;
            pruned += 1;
        }
        Ok(pruned)
    }
}

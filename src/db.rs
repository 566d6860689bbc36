use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::models::drop_record::{CharsetType, DropRecord};
use crate::models::job::{Job, JobKind, JobOutcome, JobRun, JobRunStats};
use crate::models::tld::Tld;
use crate::models::watchlist::{PatternKind, Watchlist, WatchlistUpsert};
use crate::models::zone_snapshot::ZoneSnapshot;

/// Filter set for the collaborator-facing `query_drops` read API (spec §6).
#[derive(Debug, Clone, Default)]
pub struct DropQueryFilter {
    pub tld: Option<String>,
    pub date: Option<String>,
    pub date_range: Option<(String, String)>,
    pub length_range: Option<(i64, i64)>,
    pub charset: Option<CharsetType>,
    pub substring: Option<String>,
    pub min_quality: Option<u8>,
    pub page: u32,
    pub page_size: u32,
}

impl DropQueryFilter {
    pub fn paged(page: u32, page_size: u32) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, 1000),
            ..Default::default()
        }
    }
}

/// All core persistence in one place, guarded by a single mutex the way
/// the teacher's `ConfigDb` guards its `rusqlite::Connection`. A single
/// connection is sufficient at this scale (§5: "a pooled connection per
/// worker" is the production-scale statement; this crate serializes writes
/// behind the mutex and relies on SQLite's own locking for readers).
pub struct DropwatchDb {
    conn: Mutex<Connection>,
}

impl DropwatchDb {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tlds (
                name             TEXT PRIMARY KEY,
                display_name     TEXT NOT NULL,
                is_active        INTEGER NOT NULL DEFAULT 1,
                last_import_date TEXT,
                last_drop_count  INTEGER NOT NULL DEFAULT 0,
                created_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                updated_at       TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
            );

            CREATE TABLE IF NOT EXISTS zone_snapshots (
                tld        TEXT NOT NULL,
                date       TEXT NOT NULL,
                path       TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                sha256     TEXT NOT NULL,
                fetched_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                PRIMARY KEY (tld, date)
            );

            CREATE TABLE IF NOT EXISTS drop_records (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                label        TEXT NOT NULL,
                tld          TEXT NOT NULL,
                drop_date    TEXT NOT NULL,
                length       INTEGER NOT NULL,
                label_count  INTEGER NOT NULL DEFAULT 1,
                charset_type TEXT NOT NULL,
                quality_score INTEGER,
                created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                UNIQUE (label, tld, drop_date)
            );
            CREATE INDEX IF NOT EXISTS idx_drops_tld_date ON drop_records(tld, drop_date);
            CREATE INDEX IF NOT EXISTS idx_drops_length ON drop_records(length);

            CREATE TABLE IF NOT EXISTS watchlists (
                id               TEXT PRIMARY KEY,
                user_id          TEXT NOT NULL,
                is_active        INTEGER NOT NULL DEFAULT 1,
                pattern_kind     TEXT NOT NULL CHECK(pattern_kind IN ('glob','regex','contains','prefix','suffix')),
                pattern          TEXT NOT NULL,
                min_length       INTEGER,
                max_length       INTEGER,
                allowed_tlds     TEXT NOT NULL DEFAULT '[]',
                allowed_charsets TEXT NOT NULL DEFAULT '[]',
                min_quality      INTEGER,
                inactive_reason  TEXT
            );

            CREATE TABLE IF NOT EXISTS watchlist_matches (
                watchlist_id TEXT NOT NULL REFERENCES watchlists(id) ON DELETE CASCADE,
                drop_id      INTEGER NOT NULL REFERENCES drop_records(id) ON DELETE CASCADE,
                matched_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                UNIQUE (watchlist_id, drop_id)
            );

            CREATE TABLE IF NOT EXISTS jobs (
                id                 TEXT PRIMARY KEY,
                tld                TEXT NOT NULL,
                kind               TEXT NOT NULL CHECK(kind IN ('ingest','parse','detect','full')),
                schedule           TEXT NOT NULL,
                is_enabled         INTEGER NOT NULL DEFAULT 1,
                timeout_secs       INTEGER NOT NULL DEFAULT 7200,
                max_retries        INTEGER NOT NULL DEFAULT 5,
                backoff_base_secs  INTEGER NOT NULL DEFAULT 30,
                backoff_cap_secs   INTEGER NOT NULL DEFAULT 3600
            );

            CREATE TABLE IF NOT EXISTS job_runs (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id        TEXT NOT NULL,
                tld           TEXT NOT NULL,
                kind          TEXT NOT NULL,
                target_date   TEXT NOT NULL,
                started_at    TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                finished_at   TEXT,
                outcome       TEXT CHECK(outcome IN ('success','skipped','failed','timed_out')),
                stats_json    TEXT NOT NULL DEFAULT '{}',
                error_class   TEXT,
                error_message TEXT,
                retry_count   INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_job_runs_lookup ON job_runs(tld, target_date, kind);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_job_runs_single_flight
                ON job_runs(tld, target_date, kind)
                WHERE outcome = 'success';

            CREATE TABLE IF NOT EXISTS leases (
                tld         TEXT NOT NULL,
                target_date TEXT NOT NULL,
                kind        TEXT NOT NULL,
                job_run_id  INTEGER NOT NULL,
                acquired_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                PRIMARY KEY (tld, target_date, kind)
            );
            ",
        )?;
        Ok(())
    }

    // ── TLDs ──

    pub fn upsert_tld(&self, name: &str, display_name: &str, is_active: bool) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tlds (name, display_name, is_active) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET display_name = ?2, is_active = ?3,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')",
            params![name, display_name, is_active],
        )?;
        Ok(())
    }

    pub fn get_tld(&self, name: &str) -> anyhow::Result<Option<Tld>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT name, display_name, is_active, last_import_date, last_drop_count, created_at, updated_at
             FROM tlds WHERE name = ?1",
            params![name],
            row_to_tld,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_active_tlds(&self) -> anyhow::Result<Vec<Tld>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT name, display_name, is_active, last_import_date, last_drop_count, created_at, updated_at
             FROM tlds WHERE is_active = 1 ORDER BY name",
        )?;
        let rows = stmt.query_map([], row_to_tld)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Update the TLD's markers after a successful cycle (spec invariant 2).
    /// `drop_count` is the cycle's total detected drop count (inserted +
    /// already-present), not just the insert count — a zero-insert replay
    /// (S2) re-detects the same records it saw the first time, so the total
    /// is unchanged and `last_drop_count` lands back where it was, while a
    /// genuine zero-drop day (nothing detected at all) still correctly
    /// resets it to zero.
    pub fn mark_cycle_success(&self, tld: &str, date: &str, drop_count: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tlds SET last_import_date = ?2, last_drop_count = ?3,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE name = ?1",
            params![tld, date, drop_count],
        )?;
        Ok(())
    }

    // ── Zone snapshots ──

    pub fn record_snapshot(&self, snap: &ZoneSnapshot) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO zone_snapshots (tld, date, path, size_bytes, sha256, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                snap.tld,
                snap.date,
                snap.path,
                snap.size_bytes,
                snap.sha256,
                snap.fetched_at
            ],
        )?;
        Ok(())
    }

    pub fn get_snapshot(&self, tld: &str, date: &str) -> anyhow::Result<Option<ZoneSnapshot>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT tld, date, path, size_bytes, sha256, fetched_at FROM zone_snapshots
             WHERE tld = ?1 AND date = ?2",
            params![tld, date],
            |row| {
                Ok(ZoneSnapshot {
                    tld: row.get(0)?,
                    date: row.get(1)?,
                    path: row.get(2)?,
                    size_bytes: row.get(3)?,
                    sha256: row.get(4)?,
                    fetched_at: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(Into::into)
    }

    /// Most recent snapshot date strictly before `date`, if any.
    pub fn latest_before(&self, tld: &str, date: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT date FROM zone_snapshots WHERE tld = ?1 AND date < ?2 ORDER BY date DESC LIMIT 1",
            params![tld, date],
            |row| row.get(0),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_snapshot_dates(&self, tld: &str) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT date FROM zone_snapshots WHERE tld = ?1 ORDER BY date DESC")?;
        let rows = stmt
            .query_map(params![tld], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_snapshot(&self, tld: &str, date: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM zone_snapshots WHERE tld = ?1 AND date = ?2",
            params![tld, date],
        )?;
        Ok(())
    }

    // ── Drop records ──

    /// Insert one batch, skipping labels already present for `(tld, drop_date)`.
    /// Returns `(inserted, skipped)` per spec §4.5.
    pub fn insert_drops_batch(
        &self,
        records: &[DropRecord],
    ) -> anyhow::Result<(u64, u64, Vec<i64>)> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut inserted = 0u64;
        let mut skipped = 0u64;
        let mut ids = Vec::with_capacity(records.len());
        for r in records {
            let changed = tx.execute(
                "INSERT INTO drop_records (label, tld, drop_date, length, label_count, charset_type, quality_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(label, tld, drop_date) DO NOTHING",
                params![
                    r.label,
                    r.tld,
                    r.drop_date,
                    r.length,
                    r.label_count,
                    r.charset_type.as_str(),
                    r.quality_score.map(|q| q as i64),
                ],
            )?;
            if changed > 0 {
                inserted += 1;
                ids.push(tx.last_insert_rowid());
            } else {
                skipped += 1;
                let id: i64 = tx.query_row(
                    "SELECT id FROM drop_records WHERE label = ?1 AND tld = ?2 AND drop_date = ?3",
                    params![r.label, r.tld, r.drop_date],
                    |row| row.get(0),
                )?;
                ids.push(id);
            }
        }
        tx.commit()?;
        Ok((inserted, skipped, ids))
    }

    /// Read API backing §6's `query_drops`. All filters are optional and
    /// AND-combined; results are paginated newest-first.
    #[allow(clippy::too_many_arguments)]
    pub fn query_drops(&self, filter: &DropQueryFilter) -> anyhow::Result<Vec<DropRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(tld) = &filter.tld {
            clauses.push(format!("tld = ?{}", values.len() + 1));
            values.push(Box::new(tld.clone()));
        }
        if let Some(date) = &filter.date {
            clauses.push(format!("drop_date = ?{}", values.len() + 1));
            values.push(Box::new(date.clone()));
        }
        if let Some((from, to)) = &filter.date_range {
            clauses.push(format!("drop_date >= ?{}", values.len() + 1));
            values.push(Box::new(from.clone()));
            clauses.push(format!("drop_date <= ?{}", values.len() + 1));
            values.push(Box::new(to.clone()));
        }
        if let Some((min, max)) = filter.length_range {
            clauses.push(format!("length >= ?{}", values.len() + 1));
            values.push(Box::new(min));
            clauses.push(format!("length <= ?{}", values.len() + 1));
            values.push(Box::new(max));
        }
        if let Some(charset) = filter.charset {
            clauses.push(format!("charset_type = ?{}", values.len() + 1));
            values.push(Box::new(charset.as_str().to_string()));
        }
        if let Some(substring) = &filter.substring {
            clauses.push(format!("label LIKE ?{}", values.len() + 1));
            values.push(Box::new(format!("%{substring}%")));
        }
        if let Some(min_quality) = filter.min_quality {
            clauses.push(format!("quality_score >= ?{}", values.len() + 1));
            values.push(Box::new(min_quality as i64));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let limit_idx = values.len() + 1;
        let offset_idx = values.len() + 2;
        let sql = format!(
            "SELECT label, tld, drop_date, length, label_count, charset_type, quality_score, created_at
             FROM drop_records {where_clause}
             ORDER BY drop_date DESC, label ASC
             LIMIT ?{limit_idx} OFFSET ?{offset_idx}"
        );
        values.push(Box::new(filter.page_size as i64));
        values.push(Box::new((filter.page.saturating_sub(1) * filter.page_size) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> = values.iter().map(|b| b.as_ref()).collect();
        let rows = stmt
            .query_map(params_ref.as_slice(), |row| {
                let charset_str: String = row.get(5)?;
                let quality: Option<i64> = row.get(6)?;
                Ok(DropRecord {
                    label: row.get(0)?,
                    tld: row.get(1)?,
                    drop_date: row.get(2)?,
                    length: row.get(3)?,
                    label_count: row.get(4)?,
                    charset_type: CharsetType::parse(&charset_str).unwrap_or(CharsetType::Mixed),
                    quality_score: quality.map(|q| q as u8),
                    created_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Jobs & job runs ──

    pub fn upsert_job(&self, job: &Job) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs (id, tld, kind, schedule, is_enabled, timeout_secs, max_retries, backoff_base_secs, backoff_cap_secs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET tld=?2, kind=?3, schedule=?4, is_enabled=?5,
                timeout_secs=?6, max_retries=?7, backoff_base_secs=?8, backoff_cap_secs=?9",
            params![
                job.id,
                job.tld,
                job.kind.as_str(),
                job.schedule,
                job.is_enabled,
                job.timeout_secs,
                job.max_retries,
                job.backoff_base_secs,
                job.backoff_cap_secs,
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, id: &str) -> anyhow::Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, tld, kind, schedule, is_enabled, timeout_secs, max_retries, backoff_base_secs, backoff_cap_secs
             FROM jobs WHERE id = ?1",
            params![id],
            row_to_job,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tld, kind, schedule, is_enabled, timeout_secs, max_retries, backoff_base_secs, backoff_cap_secs
             FROM jobs ORDER BY tld, kind",
        )?;
        let rows = stmt.query_map([], row_to_job)?.collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_job_enabled(&self, id: &str, is_enabled: bool) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET is_enabled = ?2 WHERE id = ?1",
            params![id, is_enabled],
        )?;
        Ok(changed > 0)
    }

    pub fn list_job_runs(&self, tld: &str, kind: JobKind, limit: u32) -> anyhow::Result<Vec<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, tld, kind, target_date, started_at, finished_at, outcome, stats_json, error_class, error_message, retry_count
             FROM job_runs WHERE tld = ?1 AND kind = ?2 ORDER BY started_at DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![tld, kind.as_str(), limit], row_to_job_run)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn list_enabled_jobs(&self) -> anyhow::Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tld, kind, schedule, is_enabled, timeout_secs, max_retries, backoff_base_secs, backoff_cap_secs
             FROM jobs WHERE is_enabled = 1",
        )?;
        let rows = stmt
            .query_map([], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recent successful target_date for `(tld, kind)`, used to compute
    /// the catch-up horizon on startup.
    pub fn last_success_date(&self, tld: &str, kind: JobKind) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT MAX(target_date) FROM job_runs WHERE tld = ?1 AND kind = ?2 AND outcome = 'success'",
            params![tld, kind.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map(|o| o.flatten())
        .map_err(Into::into)
    }

    pub fn create_job_run(&self, job_id: &str, tld: &str, kind: JobKind, target_date: &str) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_runs (job_id, tld, kind, target_date) VALUES (?1, ?2, ?3, ?4)",
            params![job_id, tld, kind.as_str(), target_date],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish_job_run(
        &self,
        run_id: i64,
        outcome: JobOutcome,
        stats: &JobRunStats,
        error_class: Option<&str>,
        error_message: Option<&str>,
        retry_count: u32,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let stats_json = serde_json::to_string(stats)?;
        conn.execute(
            "UPDATE job_runs SET finished_at = strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                outcome = ?2, stats_json = ?3, error_class = ?4, error_message = ?5, retry_count = ?6
             WHERE id = ?1",
            params![run_id, outcome.as_str(), stats_json, error_class, error_message, retry_count],
        )?;
        Ok(())
    }

    pub fn get_job_run(&self, run_id: i64) -> anyhow::Result<Option<JobRun>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, job_id, tld, kind, target_date, started_at, finished_at, outcome, stats_json, error_class, error_message, retry_count
             FROM job_runs WHERE id = ?1",
            params![run_id],
            row_to_job_run,
        )
        .optional()
        .map_err(Into::into)
    }

    // ── Leases (single-flight, spec §4.6 / §5) ──

    /// Atomic insert on a unique key; returns `false` (without error) if a
    /// lease is already held for `(tld, target_date, kind)`.
    pub fn acquire_lease(&self, tld: &str, target_date: &str, kind: JobKind, job_run_id: i64) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "INSERT INTO leases (tld, target_date, kind, job_run_id) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tld, target_date, kind) DO NOTHING",
            params![tld, target_date, kind.as_str(), job_run_id],
        )?;
        Ok(changed > 0)
    }

    pub fn release_lease(&self, tld: &str, target_date: &str, kind: JobKind) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM leases WHERE tld = ?1 AND target_date = ?2 AND kind = ?3",
            params![tld, target_date, kind.as_str()],
        )?;
        Ok(())
    }

    // ── Watchlists ──

    pub fn create_watchlist(&self, id: &str, w: &WatchlistUpsert) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO watchlists (id, user_id, pattern_kind, pattern, min_length, max_length, allowed_tlds, allowed_charsets, min_quality)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id,
                w.user_id,
                w.pattern_kind.as_str(),
                w.pattern,
                w.min_length,
                w.max_length,
                serde_json::to_string(&w.allowed_tlds)?,
                serde_json::to_string(&w.allowed_charsets)?,
                w.min_quality.map(|q| q as i64),
            ],
        )?;
        Ok(())
    }

    pub fn list_active_watchlists(&self) -> anyhow::Result<Vec<Watchlist>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, is_active, pattern_kind, pattern, min_length, max_length, allowed_tlds, allowed_charsets, min_quality, inactive_reason
             FROM watchlists WHERE is_active = 1",
        )?;
        let rows = stmt
            .query_map([], row_to_watchlist)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn deactivate_watchlist(&self, id: &str, reason: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE watchlists SET is_active = 0, inactive_reason = ?2 WHERE id = ?1",
            params![id, reason],
        )?;
        Ok(())
    }

    pub fn get_watchlist(&self, id: &str) -> anyhow::Result<Option<Watchlist>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, user_id, is_active, pattern_kind, pattern, min_length, max_length, allowed_tlds, allowed_charsets, min_quality, inactive_reason
             FROM watchlists WHERE id = ?1",
            params![id],
            row_to_watchlist,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_watchlists_for_user(&self, user_id: &str) -> anyhow::Result<Vec<Watchlist>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, is_active, pattern_kind, pattern, min_length, max_length, allowed_tlds, allowed_charsets, min_quality, inactive_reason
             FROM watchlists WHERE user_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_watchlist)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Re-activate a watchlist, clearing any prior `inactive_reason` — used
    /// when the owner fixes a pattern that the matcher had rejected.
    pub fn activate_watchlist(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE watchlists SET is_active = 1, inactive_reason = NULL WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_watchlist(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute("DELETE FROM watchlists WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    pub fn insert_watchlist_match(&self, watchlist_id: &str, drop_id: i64) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "INSERT INTO watchlist_matches (watchlist_id, drop_id) VALUES (?1, ?2)
             ON CONFLICT(watchlist_id, drop_id) DO NOTHING",
            params![watchlist_id, drop_id],
        )?;
        Ok(changed > 0)
    }

    /// Drop ids a watchlist has matched so far, newest first.
    pub fn list_matches_for_watchlist(&self, watchlist_id: &str) -> anyhow::Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT drop_id FROM watchlist_matches WHERE watchlist_id = ?1 ORDER BY matched_at DESC",
        )?;
        let rows = stmt
            .query_map(params![watchlist_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn row_to_tld(row: &rusqlite::Row) -> rusqlite::Result<Tld> {
    Ok(Tld {
        name: row.get(0)?,
        display_name: row.get(1)?,
        is_active: row.get(2)?,
        last_import_date: row.get(3)?,
        last_drop_count: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
    let kind_str: String = row.get(2)?;
    Ok(Job {
        id: row.get(0)?,
        tld: row.get(1)?,
        kind: JobKind::parse(&kind_str).unwrap_or(JobKind::Ingest),
        schedule: row.get(3)?,
        is_enabled: row.get(4)?,
        timeout_secs: row.get(5)?,
        max_retries: row.get(6)?,
        backoff_base_secs: row.get(7)?,
        backoff_cap_secs: row.get(8)?,
    })
}

fn row_to_job_run(row: &rusqlite::Row) -> rusqlite::Result<JobRun> {
    let kind_str: String = row.get(3)?;
    let outcome_str: Option<String> = row.get(7)?;
    let stats_json: String = row.get(8)?;
    Ok(JobRun {
        id: row.get(0)?,
        job_id: row.get(1)?,
        tld: row.get(2)?,
        kind: JobKind::parse(&kind_str).unwrap_or(JobKind::Ingest),
        target_date: row.get(4)?,
        started_at: row.get(5)?,
        finished_at: row.get(6)?,
        outcome: outcome_str.as_deref().and_then(JobOutcome::parse),
        stats: serde_json::from_str(&stats_json).unwrap_or_default(),
        error_class: row.get(9)?,
        error_message: row.get(10)?,
        retry_count: row.get(11)?,
    })
}

fn row_to_watchlist(row: &rusqlite::Row) -> rusqlite::Result<Watchlist> {
    let pattern_kind_str: String = row.get(3)?;
    let allowed_tlds_json: String = row.get(7)?;
    let allowed_charsets_json: String = row.get(8)?;
    let min_quality: Option<i64> = row.get(9)?;
    Ok(Watchlist {
        id: row.get(0)?,
        user_id: row.get(1)?,
        is_active: row.get(2)?,
        pattern_kind: PatternKind::parse(&pattern_kind_str).unwrap_or(PatternKind::Contains),
        pattern: row.get(4)?,
        min_length: row.get(5)?,
        max_length: row.get(6)?,
        allowed_tlds: serde_json::from_str(&allowed_tlds_json).unwrap_or_default(),
        allowed_charsets: serde_json::from_str(&allowed_charsets_json).unwrap_or_default(),
        min_quality: min_quality.map(|q| q as u8),
        inactive_reason: row.get(10)?,
    })
}

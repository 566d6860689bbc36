pub mod cron;
pub mod lease;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::coordinator::{self, CycleContext};
use crate::db::DropwatchDb;
use crate::models::job::{Job, JobOutcome, JobRunStats};
use cron::CronDescriptor;
use retry::{retry_with_backoff, Attempt, BackoffPolicy};

const DATE_FMT: &str = "%Y-%m-%d";

/// Generalizes the teacher's single `tokio::time::interval` + `tokio::spawn`
/// background-task idiom (`alert_engine::spawn_alert_engine`,
/// `retention_enforcer::spawn_retention_enforcer`) into a multi-TLD,
/// multi-worker queue with per-`(tld, date, kind)` leases (spec §4.6/§5).
pub struct JobRunner {
    db: Arc<DropwatchDb>,
    ctx: Arc<CycleContext>,
    concurrency: Arc<Semaphore>,
    catchup_horizon_days: u32,
    /// Bounded grace window for a cancelled run to reach a terminal state
    /// (spec §5: default 30 s).
    grace_window: Duration,
}

impl JobRunner {
    pub fn new(db: Arc<DropwatchDb>, ctx: Arc<CycleContext>, workers: usize, catchup_horizon_days: u32) -> Self {
        Self {
            db,
            ctx,
            concurrency: Arc::new(Semaphore::new(workers.max(1))),
            catchup_horizon_days,
            grace_window: Duration::from_secs(30),
        }
    }

    /// On startup: for each enabled job whose last success lags, enqueue one
    /// ticket per missing date, oldest first, up to `catchup_horizon_days`
    /// (spec §4.6: "Missed ticks ... are coalesced").
    pub fn catch_up_tickets(&self, jobs: &[Job], today: NaiveDate) -> anyhow::Result<Vec<(Job, NaiveDate)>> {
        let mut tickets = Vec::new();
        for job in jobs {
            if !job.is_enabled {
                continue;
            }
            let last_success = self
                .db
                .last_success_date(&job.tld, job.kind)?
                .and_then(|s| NaiveDate::parse_from_str(&s, DATE_FMT).ok());

            let earliest_allowed = today - chrono::Duration::days(self.catchup_horizon_days as i64);
            let start = match last_success {
                Some(d) if d >= today => continue,
                Some(d) => (d + chrono::Duration::days(1)).max(earliest_allowed),
                None => earliest_allowed,
            };

            let mut d = start;
            while d <= today {
                tickets.push((job.clone(), d));
                d += chrono::Duration::days(1);
            }
        }
        Ok(tickets)
    }

    /// Enqueue and run the startup catch-up batch, bounded by the worker
    /// pool's concurrency limit.
    pub async fn run_catch_up(&self) -> anyhow::Result<()> {
        let jobs = self.db.list_enabled_jobs()?;
        let today = Utc::now().date_naive();
        let tickets = self.catch_up_tickets(&jobs, today)?;
        tracing::info!(count = tickets.len(), "catch-up: enqueuing missed ticks");
        self.run_tickets(tickets).await
    }

    async fn run_tickets(&self, tickets: Vec<(Job, NaiveDate)>) -> anyhow::Result<()> {
        let mut handles = Vec::with_capacity(tickets.len());
        for (job, date) in tickets {
            let permit = self.concurrency.clone().acquire_owned().await?;
            let db = self.db.clone();
            let ctx = self.ctx.clone();
            let grace_window = self.grace_window;
            let date_str = date.format(DATE_FMT).to_string();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                run_ticket(&db, &ctx, &job, &date_str, grace_window).await
            }));
        }
        for h in handles {
            if let Err(e) = h.await {
                tracing::error!("job task panicked: {e}");
            }
        }
        Ok(())
    }

    /// Run the cron dispatch loop forever: every minute, check each enabled
    /// job's schedule and enqueue today's ticket if it fired since the last
    /// tick. Single-writer by construction — only this loop enqueues.
    pub async fn run_forever(&self) {
        let mut last_tick = Utc::now();
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now = Utc::now();
            match self.due_tickets(last_tick, now) {
                Ok(tickets) => {
                    if !tickets.is_empty() {
                        if let Err(e) = self.run_tickets(tickets).await {
                            tracing::error!("scheduler tick error: {e}");
                        }
                    }
                }
                Err(e) => tracing::error!("scheduler tick error: {e}"),
            }
            last_tick = now;
        }
    }

    fn due_tickets(
        &self,
        after: chrono::DateTime<Utc>,
        before: chrono::DateTime<Utc>,
    ) -> anyhow::Result<Vec<(Job, NaiveDate)>> {
        let mut tickets = Vec::new();
        for job in self.db.list_enabled_jobs()? {
            let descriptor = match CronDescriptor::parse(&job.schedule) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, "bad cron expression, skipping: {e}");
                    continue;
                }
            };
            if descriptor.fires_in(after, before) {
                tickets.push((job, before.date_naive()));
            }
        }
        Ok(tickets)
    }

    /// Run a single `(tld, date, kind)` synchronously, used by the `ingest`
    /// and `replay` CLI subcommands which don't go through the cron loop.
    pub async fn run_one(&self, job: &Job, date: &str) -> anyhow::Result<JobOutcome> {
        run_ticket(&self.db, &self.ctx, job, date, self.grace_window).await
    }
}

/// Acquire the lease, run the coordinator under a timeout with cooperative
/// cancellation, retry transient failures, and record the `JobRun` (spec
/// §4.6 state machine: `pending → running → terminal`).
async fn run_ticket(
    db: &Arc<DropwatchDb>,
    ctx: &Arc<CycleContext>,
    job: &Job,
    target_date: &str,
    grace_window: Duration,
) -> anyhow::Result<JobOutcome> {
    let run_id = db.create_job_run(&job.id, &job.tld, job.kind, target_date)?;

    let Some(lease) = lease::try_acquire(db.clone(), &job.tld, target_date, job.kind, run_id)? else {
        db.finish_job_run(run_id, JobOutcome::Skipped, &JobRunStats::default(), None, None, 0)?;
        tracing::info!(tld = %job.tld, target_date, kind = job.kind.as_str(), "skipped: lease held");
        return Ok(JobOutcome::Skipped);
    };

    let started = std::time::Instant::now();
    let policy = BackoffPolicy::new(
        Duration::from_secs(job.backoff_base_secs),
        Duration::from_secs(job.backoff_cap_secs),
        job.max_retries,
    );

    let mut retry_count = 0u32;
    let ctx_cloned = ctx.clone();
    let tld = job.tld.clone();
    let date = target_date.to_string();
    let timeout = Duration::from_secs(job.timeout_secs);

    let outcome_result = retry_with_backoff(policy, |attempt| {
        retry_count = attempt;
        let ctx = ctx_cloned.clone();
        let tld = tld.clone();
        let date = date.clone();
        async move { run_with_timeout(ctx, tld, date, timeout, grace_window).await }
    })
    .await;

    let elapsed_ms = started.elapsed().as_millis() as u64;
    let (outcome, stats, error_class, error_message) = match outcome_result {
        Ok(RunResult::Cycle(cycle)) => (JobOutcome::Success, cycle.stats, None, None),
        Ok(RunResult::TimedOut) => (JobOutcome::TimedOut, JobRunStats::default(), Some("timeout".to_string()), None),
        Err(e) => {
            let class = e
                .downcast_ref::<crate::error::DropwatchError>()
                .map(|e| e.error_class().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            (JobOutcome::Failed, JobRunStats::default(), Some(class), Some(e.to_string()))
        }
    };

    db.finish_job_run(run_id, outcome, &stats, error_class.as_deref(), error_message.as_deref(), retry_count)?;
    lease.release()?;

    tracing::info!(
        tld = %job.tld,
        target_date,
        kind = job.kind.as_str(),
        outcome = outcome.as_str(),
        duration_ms = elapsed_ms,
        bytes_downloaded = stats.bytes_downloaded,
        labels_parsed = stats.labels_parsed,
        drops_detected = stats.drops_detected,
        drops_inserted = stats.drops_inserted,
        error_class = error_class.as_deref().unwrap_or(""),
        "job run finished"
    );

    Ok(outcome)
}

enum RunResult {
    Cycle(coordinator::CycleOutcome),
    TimedOut,
}

/// Race the coordinator cycle against the hard wall-clock timeout. The cycle
/// runs as its own task so that on timeout `cancel` still has a live future
/// to signal — racing the *future itself* inside `tokio::time::timeout`
/// would drop it the instant the deadline elapses, leaving nothing to
/// observe the cancellation. After cancelling, the task is given the real
/// `grace_window` to reach a terminal state before it's abandoned via
/// `abort()` (spec §5: cancel signal is non-discardable, bounded grace
/// window, default 30 s).
async fn run_with_timeout(
    ctx: Arc<CycleContext>,
    tld: String,
    date: String,
    timeout: Duration,
    grace_window: Duration,
) -> Attempt<RunResult> {
    let cancel = CancellationToken::new();
    let cancel_for_run = cancel.clone();
    let mut task = tokio::spawn(async move { coordinator::run(&ctx, &tld, &date, &cancel_for_run, true).await });

    let join_result = match tokio::time::timeout(timeout, &mut task).await {
        Ok(result) => result,
        Err(_) => {
            cancel.cancel();
            match tokio::time::timeout(grace_window, &mut task).await {
                Ok(result) => result,
                Err(_) => {
                    task.abort();
                    return Attempt::Ok(RunResult::TimedOut);
                }
            }
        }
    };

    match join_result {
        Ok(Ok(cycle)) => Attempt::Ok(RunResult::Cycle(cycle)),
        Ok(Err(e)) if e.is_retryable() => Attempt::Retry(e.into()),
        Ok(Err(e)) => Attempt::Fatal(e.into()),
        Err(e) if e.is_cancelled() => Attempt::Ok(RunResult::TimedOut),
        Err(e) => Attempt::Fatal(e.into()),
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingest,
    Parse,
    Detect,
    Full,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Parse => "parse",
            JobKind::Detect => "detect",
            JobKind::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest" => Some(JobKind::Ingest),
            "parse" => Some(JobKind::Parse),
            "detect" => Some(JobKind::Detect),
            "full" => Some(JobKind::Full),
            _ => None,
        }
    }
}

/// A per-TLD cron descriptor. `schedule` is a standard 5-field cron
/// expression evaluated in UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tld: String,
    pub kind: JobKind,
    pub schedule: String,
    pub is_enabled: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Success,
    Skipped,
    Failed,
    TimedOut,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Skipped => "skipped",
            JobOutcome::Failed => "failed",
            JobOutcome::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(JobOutcome::Success),
            "skipped" => Some(JobOutcome::Skipped),
            "failed" => Some(JobOutcome::Failed),
            "timed_out" => Some(JobOutcome::TimedOut),
            _ => None,
        }
    }
}

/// Stats attached to a finished JobRun, logged as a single structured record
/// per spec §4.6 Observability.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRunStats {
    pub bytes_downloaded: u64,
    pub labels_parsed: u64,
    pub drops_detected: u64,
    pub drops_inserted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: i64,
    pub job_id: String,
    pub tld: String,
    pub kind: JobKind,
    pub target_date: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub outcome: Option<JobOutcome>,
    pub stats: JobRunStats,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: u32,
}

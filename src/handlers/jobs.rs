use axum::{Json, extract::Path, extract::Query, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::models::job::{Job, JobKind};

#[derive(Debug, Deserialize)]
pub struct JobUpsertRequest {
    pub id: Option<String>,
    pub tld: String,
    pub kind: String,
    pub schedule: String,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    2 * 60 * 60
}
fn default_max_retries() -> u32 {
    5
}
fn default_backoff_base_secs() -> u64 {
    30
}
fn default_backoff_cap_secs() -> u64 {
    60 * 60
}

/// Idempotent upsert. A caller supplying `id` updates that job in place
/// (used to flip `is_enabled`, which "takes effect on the next scheduler
/// tick" per spec §6 — there is no separate enable/disable endpoint).
pub async fn upsert_job(
    State(state): State<AppState>,
    Json(req): Json<JobUpsertRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let kind = JobKind::parse(&req.kind)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid job kind: {}", req.kind)))?;
    crate::scheduler::cron::CronDescriptor::parse(&req.schedule)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid cron expression: {e}")))?;

    let id = req.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let job = Job {
        id: id.clone(),
        tld: req.tld,
        kind,
        schedule: req.schedule,
        is_enabled: req.is_enabled,
        timeout_secs: req.timeout_secs,
        max_retries: req.max_retries,
        backoff_base_secs: req.backoff_base_secs,
        backoff_cap_secs: req.backoff_cap_secs,
    };
    state
        .db
        .upsert_job(&job)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(job))
}

pub async fn list_jobs(State(state): State<AppState>) -> Result<impl IntoResponse, (StatusCode, String)> {
    let jobs = state
        .db
        .list_jobs()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "jobs": jobs })))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let job = state
        .db
        .get_job(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "job not found".to_string()))?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct JobRunsParams {
    pub tld: String,
    pub kind: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

pub async fn list_job_runs(
    State(state): State<AppState>,
    Query(params): Query<JobRunsParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let kind = JobKind::parse(&params.kind)
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid job kind: {}", params.kind)))?;
    let runs = state
        .db
        .list_job_runs(&params.tld, kind, params.limit.clamp(1, 1000))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "job_runs": runs })))
}

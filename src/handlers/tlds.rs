use axum::{Json, extract::Path, extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;
use crate::models::tld::TldUpsert;

/// Idempotent upsert (spec §6: "CRUD with idempotent upserts"). Creating a
/// TLD that already exists just updates `display_name`/`is_active`.
pub async fn upsert_tld(
    State(state): State<AppState>,
    Json(req): Json<TldUpsert>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .db
        .upsert_tld(&req.name, &req.display_name, req.is_active)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let tld = state
        .db
        .get_tld(&req.name)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::INTERNAL_SERVER_ERROR, "failed to read upserted tld".to_string()))?;
    Ok(Json(tld))
}

pub async fn list_tlds(State(state): State<AppState>) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tlds = state
        .db
        .list_active_tlds()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "tlds": tlds })))
}

pub async fn get_tld(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let tld = state
        .db
        .get_tld(&name)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "tld not found".to_string()))?;
    Ok(Json(tld))
}

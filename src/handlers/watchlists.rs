use axum::{Json, extract::Path, extract::Query, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use crate::models::watchlist::WatchlistUpsert;

/// Created/edited/deleted by the owning user (spec §3 lifecycle). Auth is
/// out of scope for this core, so ownership here is whatever `user_id` the
/// caller supplies — the out-of-scope auth layer is expected to pin that
/// value from a session before requests reach this handler.
pub async fn create_watchlist(
    State(state): State<AppState>,
    Json(req): Json<WatchlistUpsert>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let id = Uuid::new_v4().to_string();
    state
        .db
        .create_watchlist(&id, &req)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let watchlist = state
        .db
        .get_watchlist(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::INTERNAL_SERVER_ERROR, "failed to read created watchlist".to_string()))?;
    Ok((StatusCode::CREATED, Json(watchlist)))
}

#[derive(Debug, Deserialize)]
pub struct ListWatchlistsParams {
    pub user_id: String,
}

pub async fn list_watchlists(
    State(state): State<AppState>,
    Query(params): Query<ListWatchlistsParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let watchlists = state
        .db
        .list_watchlists_for_user(&params.user_id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(serde_json::json!({ "watchlists": watchlists })))
}

pub async fn get_watchlist(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let watchlist = state
        .db
        .get_watchlist(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "watchlist not found".to_string()))?;
    Ok(Json(watchlist))
}

pub async fn activate_watchlist(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let activated = state
        .db
        .activate_watchlist(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !activated {
        return Err((StatusCode::NOT_FOUND, "watchlist not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_watchlist(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let deleted = state
        .db
        .delete_watchlist(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "watchlist not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}

use axum::{Json, extract::Query, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;

use crate::AppState;
use crate::db::DropQueryFilter;
use crate::models::drop_record::CharsetType;

/// Query params for the `query_drops` collaborator read API (spec §6). All
/// fields are optional and AND-combined by [`DropQueryFilter`].
#[derive(Debug, Deserialize)]
pub struct DropQueryParams {
    pub tld: Option<String>,
    pub date: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub min_length: Option<i64>,
    pub max_length: Option<i64>,
    pub charset: Option<String>,
    pub substring: Option<String>,
    pub min_quality: Option<u8>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

pub async fn query_drops(
    State(state): State<AppState>,
    Query(params): Query<DropQueryParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let charset = match params.charset.as_deref() {
        Some(c) => Some(
            CharsetType::parse(c)
                .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("invalid charset: {c}")))?,
        ),
        None => None,
    };
    let filter = DropQueryFilter {
        tld: params.tld,
        date: params.date,
        date_range: match (params.date_from, params.date_to) {
            (Some(from), Some(to)) => Some((from, to)),
            _ => None,
        },
        length_range: match (params.min_length, params.max_length) {
            (Some(min), Some(max)) => Some((min, max)),
            (Some(min), None) => Some((min, i64::MAX)),
            (None, Some(max)) => Some((i64::MIN, max)),
            (None, None) => None,
        },
        charset,
        substring: params.substring,
        min_quality: params.min_quality,
        page: params.page.max(1),
        page_size: params.page_size.clamp(1, 1000),
    };

    let drops = state
        .db
        .query_drops(&filter)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(serde_json::json!({ "drops": drops, "page": filter.page, "page_size": filter.page_size })))
}

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use multicache_api_types::{
    InspectQuery, InspectResponse, PurgeKeysRequest, PurgeResponse, PurgeTagsRequest,
    StatsResponse,
};
use tracing::info;

use super::error::ApiError;
use super::state::ApiState;

pub async fn purge_all(State(state): State<ApiState>) -> Json<PurgeResponse> {
    state.manager.purge_all().await;
    Json(PurgeResponse::ok(Vec::new()))
}

pub async fn purge_tags(
    State(state): State<ApiState>,
    body: Result<Json<PurgeTagsRequest>, JsonRejection>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let Json(PurgeTagsRequest { tags }) = body.map_err(|rejection| {
        ApiError::bad_request("Expected a JSON list of tags", Some(rejection.body_text()))
    })?;
    if tags.is_empty() {
        return Err(ApiError::bad_request("No tags given", None));
    }

    let delay_secs = state.tag_invalidation_delay.as_secs();
    info!(tags = ?tags, delay_secs, "purging tags via management API");
    state.manager.purge_by_tags(&tags, delay_secs).await;
    Ok(Json(PurgeResponse::ok(tags)))
}

pub async fn purge_item(
    State(state): State<ApiState>,
    Path(cache_name): Path<String>,
    body: Result<Json<PurgeKeysRequest>, JsonRejection>,
) -> Result<Json<PurgeResponse>, ApiError> {
    let name = state.resolve_cache(&cache_name)?;
    let keys = body
        .map_err(|rejection| {
            ApiError::bad_request("Expected a key or a list of keys", Some(rejection.body_text()))
        })?
        .0
        .into_keys();
    if keys.is_empty() {
        return Err(ApiError::bad_request("No keys given", None));
    }

    for key in &keys {
        state.manager.purge_item(name, key).await?;
    }
    info!(cache = %name, count = keys.len(), "purged items via management API");
    Ok(Json(PurgeResponse::ok(keys)))
}

pub async fn stats(
    State(state): State<ApiState>,
    Path(cache_name): Path<String>,
) -> Result<Json<StatsResponse>, ApiError> {
    let name = state.resolve_cache(&cache_name)?;
    let stats = state.manager.stats(name).await?;
    Ok(Json(StatsResponse {
        cache: name.to_string(),
        count: stats.count,
        metadata: stats.metadata,
    }))
}

pub async fn inspect(
    State(state): State<ApiState>,
    Path(cache_name): Path<String>,
    query: Result<Query<InspectQuery>, QueryRejection>,
) -> Result<Json<InspectResponse>, ApiError> {
    let name = state.resolve_cache(&cache_name)?;
    let Query(InspectQuery { key }) = query.map_err(|rejection| {
        ApiError::bad_request("Invalid query", Some(rejection.body_text()))
    })?;
    let key = key
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing `key` query parameter", None))?;

    let item = state.manager.inspect(name, &key).await?;
    Ok(Json(InspectResponse { item }))
}

//! Demo routes served by `multicache serve`.
//!
//! Exercise every cache surface: a cacheable page assembled from cached
//! fragments, a data endpoint backed by the data store and a page that vetoes
//! caching.

use axum::{
    Json, Router,
    extract::Path,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::cache::{CacheName, DataCache, scope, with_data_cache};
use crate::error::HttpError;

const HOME_MAX_AGE_SECS: u64 = 300;
const DATA_MAX_AGE_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedValue {
    pub key: String,
    pub generated_at: i64,
}

pub fn build_playground_router() -> Router {
    Router::new()
        .route("/", get(home))
        .route("/data/{key}", get(data))
        .route("/uncached", get(uncached))
}

async fn home() -> impl IntoResponse {
    if let Some(route) = scope::current_route() {
        route
            .set_cacheable()
            .add_tags(["page:home"])
            .set_max_age(HOME_MAX_AGE_SECS)
            .add_cache_control(["public"]);
    }

    let mut teasers = String::new();
    for id in 1..=3 {
        teasers.push_str(&teaser(id).await);
    }

    Html(format!(
        "<!doctype html><html><body><h1>multicache</h1>{teasers}<p>rendered at {}</p></body></html>",
        OffsetDateTime::now_utc().unix_timestamp()
    ))
}

/// A fragment cached in the component store and tagged per article.
async fn teaser(id: u32) -> String {
    let tag = format!("article:{id}");
    if let Some(route) = scope::current_route() {
        route.add_tags([tag.clone()]);
    }

    let entry = DataCache::for_store(CacheName::Component)
        .with_cache::<String>(&format!("Teaser::{id}"), None)
        .await;
    if let Some(markup) = entry.value {
        return markup;
    }

    let markup = format!("<article id=\"teaser-{id}\">Article {id}</article>");
    entry.add_to_cache(&markup, [tag], None).await;
    markup
}

async fn data(Path(key): Path<String>) -> Result<Json<GeneratedValue>, HttpError> {
    if let Some(route) = scope::current_route() {
        route.set_cacheable().add_tags([format!("data:{key}")]);
    }

    let entry = with_data_cache::<GeneratedValue>(&format!("generated:{key}"), None).await;
    let value = entry
        .get_or_populate(
            ["data".to_string(), format!("data:{key}")],
            Some(DATA_MAX_AGE_SECS),
            || async {
                Ok::<_, HttpError>(GeneratedValue {
                    key: key.clone(),
                    generated_at: OffsetDateTime::now_utc().unix_timestamp(),
                })
            },
        )
        .await?;
    Ok(Json(value))
}

async fn uncached() -> impl IntoResponse {
    if let Some(route) = scope::current_route() {
        route.set_uncacheable().add_cache_control(["private"]);
    }
    Html(format!(
        "<p>uncached, rendered at {}</p>",
        OffsetDateTime::now_utc().unix_timestamp()
    ))
}

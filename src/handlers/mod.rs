/// HTTP request handlers
use crate::card::{ShareCard, ShareCardRenderer};
use crate::domain::{ApodItem, EventStatus, Health, ServiceStatus};
use crate::errors::{ApiError, ApiResult};
use crate::repo::FavoritesStore;
use crate::services::FeedService;
use crate::utils::make_permalink;
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub feeds: Arc<FeedService>,
    pub favorites: FavoritesStore,
    pub cards: Arc<ShareCardRenderer>,
    pub public_base_url: Arc<str>,
    pub api_key_provided: bool,
}

/// Successful response wrapper
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

fn ok(data: Value) -> Json<Value> {
    Json(json!(SuccessResponse::new(data)))
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn days_ago(n: u64) -> NaiveDate {
    today().checked_sub_days(Days::new(n)).unwrap_or_else(today)
}

#[derive(Deserialize)]
pub struct ApodQuery {
    pub date: Option<NaiveDate>,
    pub thumbs: Option<bool>,
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub thumbs: Option<bool>,
}

#[derive(Deserialize)]
pub struct RandomQuery {
    pub count: Option<u32>,
    pub thumbs: Option<bool>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub page: Option<u32>,
    pub media_type: Option<String>,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    pub status: Option<EventStatus>,
    pub days: Option<u32>,
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct NeoQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Health check handler
pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        now: Utc::now(),
    })
}

/// Store connectivity, key status and cache counters
pub async fn get_status(State(state): State<AppState>) -> Json<SuccessResponse<ServiceStatus>> {
    let stats = state.feeds.cache_stats();
    Json(SuccessResponse::new(ServiceStatus {
        store: state.favorites.state().await.as_str(),
        store_connect_attempts: state.favorites.connect_attempts(),
        api_key_provided: state.api_key_provided,
        cache_entries: stats.entries,
        cache_hits: stats.hits,
        cache_misses: stats.misses,
    }))
}

/// APOD for one date (defaults to ten days ago)
pub async fn get_apod(
    Query(q): Query<ApodQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let date = q.date.unwrap_or_else(|| days_ago(10));
    let item = state
        .feeds
        .apod_by_date(date, q.thumbs.unwrap_or(true))
        .await?;
    Ok(ok(json!({ "item": item })))
}

/// APOD range (defaults to the last two weeks)
pub async fn get_apod_range(
    Query(q): Query<RangeQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let start = q.start_date.unwrap_or_else(|| days_ago(14));
    let end = q.end_date.unwrap_or_else(today);
    let items = state
        .feeds
        .apod_range(start, end, q.thumbs.unwrap_or(true))
        .await?;
    Ok(ok(json!({ "items": items })))
}

/// Random APOD draw
pub async fn get_apod_random(
    Query(q): Query<RandomQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let items = state
        .feeds
        .apod_random(q.count.unwrap_or(1), q.thumbs.unwrap_or(true))
        .await?;
    Ok(ok(json!({ "items": items })))
}

/// PNG share card for one date
pub async fn get_share_card(
    Path(date): Path<NaiveDate>,
    State(state): State<AppState>,
) -> ApiResult<Response> {
    let item = state.feeds.apod_by_date(date, true).await?;
    let permalink = make_permalink(&state.public_base_url, item.date);
    let card = state.cards.build(&item, &permalink).await?;

    let disposition = format!("attachment; filename=\"{}\"", card.file_name());
    Ok((
        [
            (header::CONTENT_TYPE, ShareCard::MIME.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        card.png,
    )
        .into_response())
}

/// Media library search
pub async fn search_images(
    Query(q): Query<SearchQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let result = state
        .feeds
        .search_images(&q.q, q.page.unwrap_or(1), q.media_type.as_deref())
        .await?;
    Ok(ok(json!({ "result": result })))
}

/// Media asset manifest
pub async fn get_image_asset(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let result = state.feeds.image_asset(&id).await?;
    Ok(ok(json!({ "id": id, "result": result })))
}

/// Natural events feed
pub async fn get_events(
    Query(q): Query<EventsQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let result = state
        .feeds
        .natural_events(
            q.status.unwrap_or_default(),
            q.days.unwrap_or(30),
            q.category.as_deref(),
        )
        .await?;
    Ok(ok(json!({ "result": result })))
}

/// Natural event categories
pub async fn get_event_categories(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let result = state.feeds.event_categories().await?;
    Ok(ok(json!({ "result": result })))
}

/// Near-Earth objects (defaults to the last two days)
pub async fn get_neo(
    Query(q): Query<NeoQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let start = q.start_date.unwrap_or_else(|| days_ago(2));
    let end = q.end_date.unwrap_or_else(today);
    let feed = state.feeds.neo_feed(start, end).await?;
    Ok(ok(json!(feed)))
}

/// Favorites for a user, newest first
pub async fn list_favorites(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
) -> Json<Value> {
    let items = state.favorites.list_favorites(&user_id).await;
    ok(json!({ "user_id": user_id, "items": items }))
}

/// Save (or overwrite) a favorite
pub async fn save_favorite(
    Path(user_id): Path<String>,
    State(state): State<AppState>,
    Json(item): Json<ApodItem>,
) -> ApiResult<Json<Value>> {
    if user_id.trim().is_empty() {
        return Err(ApiError::InvalidInput("user_id must not be empty".into()));
    }
    let saved = state.favorites.save_favorite(&user_id, &item).await;
    Ok(ok(json!({ "saved": saved, "apod_date": item.date })))
}

/// Remove a favorite; removing a missing one still reports success
pub async fn remove_favorite(
    Path((user_id, date)): Path<(String, NaiveDate)>,
    State(state): State<AppState>,
) -> Json<Value> {
    let removed = state.favorites.remove_favorite(&user_id, date).await;
    ok(json!({ "removed": removed, "apod_date": date }))
}

/// Drop cached responses for the listed operations
pub async fn refresh_cache(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Json<Value> {
    let ops_str = params.get("op").cloned().unwrap_or_default();

    let ops: Vec<&str> = ops_str
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();

    let refreshed = state.feeds.refresh(&ops);
    ok(json!({ "refreshed": refreshed }))
}

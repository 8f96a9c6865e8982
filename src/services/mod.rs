/// Business logic services layer
use crate::cache::{CacheStats, ResponseCache};
use crate::clients::{EonetClient, ImageLibraryClient, NasaClient};
use crate::config::CacheTtls;
use crate::domain::{
    ApodItem, ApodRange, EventStatus, NeoApproach, NeoFeed, NeoWindow, APOD_EARLIEST,
};
use crate::errors::FetchError;
use crate::utils::{km_to_ld, num, s_pick};
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;

/// Largest random draw the dashboard asks for
pub const MAX_RANDOM_COUNT: u32 = 30;

pub const OP_APOD_SINGLE: &str = "apod.single";
pub const OP_APOD_RANGE: &str = "apod.range";
pub const OP_IMAGES_SEARCH: &str = "images.search";
pub const OP_IMAGES_ASSET: &str = "images.asset";
pub const OP_EVENTS: &str = "events.list";
pub const OP_CATEGORIES: &str = "events.categories";
pub const OP_NEO: &str = "neo.feed";

/// Operations that can be dropped from the cache by name
pub const CACHED_OPERATIONS: [&str; 7] = [
    OP_APOD_SINGLE,
    OP_APOD_RANGE,
    OP_IMAGES_SEARCH,
    OP_IMAGES_ASSET,
    OP_EVENTS,
    OP_CATEGORIES,
    OP_NEO,
];

fn flag(b: bool) -> String {
    if b { "true" } else { "false" }.to_string()
}

fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn apod_single_params(date: NaiveDate, thumbs: bool) -> Vec<(&'static str, String)> {
    vec![("date", iso(date.max(APOD_EARLIEST))), ("thumbs", flag(thumbs))]
}

pub fn apod_range_params(range: ApodRange, thumbs: bool) -> Vec<(&'static str, String)> {
    vec![
        ("start_date", iso(range.start)),
        ("end_date", iso(range.end)),
        ("thumbs", flag(thumbs)),
    ]
}

pub fn neo_params(window: NeoWindow) -> Vec<(&'static str, String)> {
    vec![("start_date", iso(window.start)), ("end_date", iso(window.end))]
}

fn decode<T: serde::de::DeserializeOwned>(operation: &str, value: Value) -> Result<T, FetchError> {
    serde_json::from_value(value).map_err(|e| FetchError::Decode {
        operation: operation.to_string(),
        message: e.to_string(),
    })
}

/// Range and random responses may be a bare object when only one item matches
pub fn apod_items_from(operation: &str, value: Value) -> Result<Vec<ApodItem>, FetchError> {
    let mut items: Vec<ApodItem> = match value {
        Value::Array(_) => decode(operation, value)?,
        other => vec![decode(operation, other)?],
    };
    items.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(items)
}

/// Flatten a NeoWs feed into one row per close approach
pub fn summarize_neo(feed: &Value) -> Vec<NeoApproach> {
    let mut approaches = Vec::new();
    let Some(days) = feed.get("near_earth_objects").and_then(Value::as_object) else {
        return approaches;
    };

    for (day, objects) in days {
        for obj in objects.as_array().into_iter().flatten() {
            let name = s_pick(obj, &["name", "designation", "id"]).unwrap_or_default();
            let hazardous = obj
                .get("is_potentially_hazardous_asteroid")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let meters = &obj["estimated_diameter"]["meters"];
            let approach = obj
                .get("close_approach_data")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .cloned()
                .unwrap_or(Value::Null);
            let miss_km = num(&approach["miss_distance"]["kilometers"]);

            approaches.push(NeoApproach {
                id: s_pick(obj, &["id", "neo_reference_id"]),
                name,
                date: s_pick(&approach, &["close_approach_date"]).unwrap_or_else(|| day.clone()),
                hazardous,
                miss_distance_km: miss_km,
                miss_distance_ld: miss_km.map(km_to_ld),
                velocity_km_s: num(&approach["relative_velocity"]["kilometers_per_second"]),
                diameter_min_m: num(&meters["estimated_diameter_min"]),
                diameter_max_m: num(&meters["estimated_diameter_max"]),
            });
        }
    }

    approaches.sort_by(|a, b| {
        a.date.cmp(&b.date).then_with(|| {
            let ka = a.miss_distance_km.unwrap_or(f64::INFINITY);
            let kb = b.miss_distance_km.unwrap_or(f64::INFINITY);
            ka.total_cmp(&kb)
        })
    });
    approaches
}

/// Feed aggregation service: every remote read goes through the shared cache
pub struct FeedService {
    cache: Arc<ResponseCache>,
    nasa_client: NasaClient,
    images_client: ImageLibraryClient,
    eonet_client: EonetClient,
    ttls: CacheTtls,
}

impl FeedService {
    pub fn new(
        cache: Arc<ResponseCache>,
        nasa_client: NasaClient,
        images_client: ImageLibraryClient,
        eonet_client: EonetClient,
        ttls: CacheTtls,
    ) -> Self {
        Self {
            cache,
            nasa_client,
            images_client,
            eonet_client,
            ttls,
        }
    }

    /// APOD for one date; dates before the archive floor are raised to it
    pub async fn apod_by_date(&self, date: NaiveDate, thumbs: bool) -> Result<ApodItem, FetchError> {
        let params = apod_single_params(date, thumbs);
        let value = self
            .cache
            .get_or_fetch(OP_APOD_SINGLE, &params, self.ttls.apod, || {
                self.nasa_client.fetch_apod(&params)
            })
            .await?;
        decode(OP_APOD_SINGLE, value)
    }

    /// APOD items in an inclusive range, newest first
    pub async fn apod_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        thumbs: bool,
    ) -> Result<Vec<ApodItem>, FetchError> {
        let params = apod_range_params(ApodRange::new(start, end), thumbs);
        let value = self
            .cache
            .get_or_fetch(OP_APOD_RANGE, &params, self.ttls.apod, || {
                self.nasa_client.fetch_apod_range(&params)
            })
            .await?;
        apod_items_from(OP_APOD_RANGE, value)
    }

    /// `count` random items. Never cached: every call is a fresh draw.
    pub async fn apod_random(&self, count: u32, thumbs: bool) -> Result<Vec<ApodItem>, FetchError> {
        if count == 0 || count > MAX_RANDOM_COUNT {
            return Err(FetchError::InvalidInput(format!(
                "count must be between 1 and {}",
                MAX_RANDOM_COUNT
            )));
        }
        let params = [("count", count.to_string()), ("thumbs", flag(thumbs))];
        let value = self.nasa_client.fetch_apod_random(&params).await?;
        apod_items_from("apod.random", value)
    }

    pub async fn search_images(
        &self,
        q: &str,
        page: u32,
        media_type: Option<&str>,
    ) -> Result<Value, FetchError> {
        let q = q.trim();
        if q.is_empty() {
            return Err(FetchError::InvalidInput("q must not be empty".into()));
        }
        let mut params = vec![("q", q.to_string()), ("page", page.max(1).to_string())];
        if let Some(mt) = media_type.filter(|m| !m.is_empty()) {
            params.push(("media_type", mt.to_string()));
        }
        self.cache
            .get_or_fetch(OP_IMAGES_SEARCH, &params, self.ttls.images, || {
                self.images_client.search(&params)
            })
            .await
    }

    pub async fn image_asset(&self, nasa_id: &str) -> Result<Value, FetchError> {
        let valid = !nasa_id.is_empty()
            && nasa_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(FetchError::InvalidInput(format!("bad asset id {:?}", nasa_id)));
        }
        let params = [("id", nasa_id.to_string())];
        self.cache
            .get_or_fetch(OP_IMAGES_ASSET, &params, self.ttls.images, || {
                self.images_client.asset(nasa_id)
            })
            .await
    }

    pub async fn natural_events(
        &self,
        status: EventStatus,
        days: u32,
        category: Option<&str>,
    ) -> Result<Value, FetchError> {
        let mut params = vec![
            ("status", status.as_str().to_string()),
            ("days", days.max(1).to_string()),
        ];
        if let Some(c) = category.filter(|c| !c.is_empty()) {
            params.push(("category", c.to_string()));
        }
        self.cache
            .get_or_fetch(OP_EVENTS, &params, self.ttls.events, || {
                self.eonet_client.events(&params)
            })
            .await
    }

    pub async fn event_categories(&self) -> Result<Value, FetchError> {
        self.cache
            .get_or_fetch(OP_CATEGORIES, &[], self.ttls.categories, || {
                self.eonet_client.categories()
            })
            .await
    }

    /// NEO feed for a window clamped to at most six days
    pub async fn neo_feed(&self, start: NaiveDate, end: NaiveDate) -> Result<NeoFeed, FetchError> {
        let window = NeoWindow::new(start, end);
        let params = neo_params(window);
        let raw = self
            .cache
            .get_or_fetch(OP_NEO, &params, self.ttls.neo, || {
                self.nasa_client.fetch_neo_feed(&params)
            })
            .await?;

        let approaches = summarize_neo(&raw);
        Ok(NeoFeed {
            start_date: window.start,
            end_date: window.end,
            element_count: approaches.len(),
            approaches,
            raw,
        })
    }

    /// Drop cached entries for the named operations; `all` empties the
    /// cache and unknown names are skipped
    pub fn refresh(&self, operations: &[&str]) -> Vec<String> {
        if operations.contains(&"all") {
            self.cache.clear();
            return CACHED_OPERATIONS.iter().map(|op| op.to_string()).collect();
        }
        operations
            .iter()
            .filter(|op| CACHED_OPERATIONS.contains(*op))
            .map(|op| {
                self.cache.invalidate_operation(op);
                op.to_string()
            })
            .collect()
    }

    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{mock, HttpClient};
    use crate::clock::ManualClock;
    use crate::config::FetchTimeouts;
    use axum::{extract::Query, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_single_params_clamp_to_floor() {
        let params = apod_single_params(d("1990-05-05"), true);
        assert_eq!(params[0], ("date", "1995-06-16".to_string()));
        assert_eq!(params[1], ("thumbs", "true".to_string()));
    }

    #[test]
    fn test_range_params_use_normalized_range() {
        let params = apod_range_params(ApodRange::new(d("2024-02-10"), d("2024-02-01")), false);
        assert_eq!(params[0], ("start_date", "2024-02-01".to_string()));
        assert_eq!(params[1], ("end_date", "2024-02-10".to_string()));
        assert_eq!(params[2], ("thumbs", "false".to_string()));
    }

    #[test]
    fn test_neo_params_clamp_window() {
        let params = neo_params(NeoWindow::new(d("2024-05-30"), d("2024-05-01")));
        assert_eq!(params[0].1, "2024-05-01");
        assert_eq!(params[1].1, "2024-05-07");
    }

    #[test]
    fn test_items_sorted_newest_first() {
        let value = json!([
            {"date": "2024-01-01", "title": "a"},
            {"date": "2024-01-03", "title": "c"},
            {"date": "2024-01-02", "title": "b"}
        ]);
        let items = apod_items_from(OP_APOD_RANGE, value).unwrap();
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["c", "b", "a"]);
    }

    #[test]
    fn test_single_object_wrapped_into_list() {
        let items = apod_items_from(OP_APOD_RANGE, json!({"date": "2024-01-01"})).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_undecodable_payload_is_decode_error() {
        let err = apod_items_from(OP_APOD_RANGE, json!({"msg": "rate limited"})).unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[test]
    fn test_summarize_neo() {
        let feed = json!({
            "element_count": 2,
            "near_earth_objects": {
                "2024-01-02": [{
                    "id": "2",
                    "name": "(2024 BB)",
                    "is_potentially_hazardous_asteroid": true,
                    "estimated_diameter": {"meters": {"estimated_diameter_min": 10.5, "estimated_diameter_max": 23.0}},
                    "close_approach_data": [{
                        "close_approach_date": "2024-01-02",
                        "miss_distance": {"kilometers": "768800"},
                        "relative_velocity": {"kilometers_per_second": "12.5"}
                    }]
                }],
                "2024-01-01": [
                    {"id": "1", "name": "(2024 AA)", "close_approach_data": [{
                        "close_approach_date": "2024-01-01",
                        "miss_distance": {"kilometers": "500000"}
                    }]},
                    {"id": "0", "name": "(2023 ZZ)", "close_approach_data": [{
                        "close_approach_date": "2024-01-01",
                        "miss_distance": {"kilometers": "100000"}
                    }]}
                ]
            }
        });

        let rows = summarize_neo(&feed);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].name, "(2023 ZZ)");
        assert_eq!(rows[1].name, "(2024 AA)");
        assert!(rows[2].hazardous);
        assert_eq!(rows[2].miss_distance_ld, Some(2.0));
        assert_eq!(rows[2].velocity_km_s, Some(12.5));
        assert_eq!(rows[2].diameter_max_m, Some(23.0));
    }

    #[test]
    fn test_summarize_neo_tolerates_missing_objects() {
        assert!(summarize_neo(&json!({})).is_empty());
    }

    struct Upstream {
        feeds: FeedService,
        apod_hits: Arc<AtomicUsize>,
        search_hits: Arc<AtomicUsize>,
    }

    /// FeedService over a local server: APOD answers, media search fails with 503
    async fn upstream() -> Upstream {
        let apod_hits = Arc::new(AtomicUsize::new(0));
        let search_hits = Arc::new(AtomicUsize::new(0));

        let apod_counter = apod_hits.clone();
        let search_counter = search_hits.clone();
        let router = Router::new()
            .route(
                "/planetary/apod",
                get(move |Query(q): Query<HashMap<String, String>>| {
                    let hits = apod_counter.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        let body = match q.get("count").and_then(|c| c.parse::<u32>().ok()) {
                            Some(n) => Value::Array(
                                (1..=n)
                                    .map(|i| json!({"date": format!("2024-01-{:02}", i), "title": "random"}))
                                    .collect(),
                            ),
                            None => json!({"date": q.get("date"), "title": "single"}),
                        };
                        Json(body)
                    }
                }),
            )
            .route(
                "/search",
                get(move || {
                    let hits = search_counter.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::SERVICE_UNAVAILABLE, "over capacity")
                    }
                }),
            );
        let base = mock::serve(router).await;

        let timeouts = FetchTimeouts {
            single: Duration::from_secs(2),
            range: Duration::from_secs(2),
        };
        let http = HttpClient::new(Duration::from_secs(5)).unwrap();
        let feeds = FeedService::new(
            Arc::new(ResponseCache::new(Arc::new(ManualClock::new()))),
            NasaClient::new(http.clone(), "abc".to_string(), timeouts.clone()).with_base_url(&base),
            ImageLibraryClient::new(http.clone(), &timeouts).with_base_url(&base),
            EonetClient::new(http, &timeouts).with_base_url(&base),
            CacheTtls::default(),
        );
        Upstream {
            feeds,
            apod_hits,
            search_hits,
        }
    }

    #[tokio::test]
    async fn test_apod_lookups_are_served_from_cache() {
        let up = upstream().await;

        let first = up.feeds.apod_by_date(d("2024-01-01"), true).await.unwrap();
        let second = up.feeds.apod_by_date(d("2024-01-01"), true).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.title, "single");
        assert_eq!(up.apod_hits.load(Ordering::SeqCst), 1);
        assert_eq!(up.feeds.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn test_random_draws_bypass_cache() {
        let up = upstream().await;

        let items = up.feeds.apod_random(3, true).await.unwrap();
        up.feeds.apod_random(3, true).await.unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].date, d("2024-01-03"));
        assert_eq!(up.apod_hits.load(Ordering::SeqCst), 2);
        assert_eq!(up.feeds.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_random_count_out_of_bounds_never_fetches() {
        let up = upstream().await;

        for count in [0, MAX_RANDOM_COUNT + 1] {
            let err = up.feeds.apod_random(count, true).await.unwrap_err();
            assert!(matches!(err, FetchError::InvalidInput(_)));
        }
        assert_eq!(up.apod_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_retried_not_cached() {
        let up = upstream().await;

        for _ in 0..2 {
            let err = up.feeds.search_images("nebula", 1, None).await.unwrap_err();
            assert!(matches!(err, FetchError::Status { status: 503, .. }));
        }
        assert_eq!(up.search_hits.load(Ordering::SeqCst), 2);
        assert_eq!(up.feeds.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn test_refresh_forces_refetch() {
        let up = upstream().await;

        up.feeds.apod_by_date(d("2024-01-01"), true).await.unwrap();
        let dropped = up.feeds.refresh(&["apod.single", "bogus"]);
        assert_eq!(dropped, ["apod.single"]);
        up.feeds.apod_by_date(d("2024-01-01"), true).await.unwrap();

        assert_eq!(up.apod_hits.load(Ordering::SeqCst), 2);
    }
}

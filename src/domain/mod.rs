/// Domain models for the application
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First date the APOD archive has an entry for
pub const APOD_EARLIEST: NaiveDate = match NaiveDate::from_ymd_opt(1995, 6, 16) {
    Some(d) => d,
    None => panic!("invalid archive floor"),
};

/// NeoWs rejects windows longer than seven days (six day span, inclusive)
pub const NEO_MAX_SPAN_DAYS: u64 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Image,
    Video,
    #[serde(other)]
    Other,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "image" => MediaType::Image,
            "video" => MediaType::Video,
            _ => MediaType::Other,
        }
    }
}

/// One Astronomy Picture of the Day entry; identity is its date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApodItem {
    pub date: NaiveDate,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub hdurl: Option<String>,
    #[serde(default, alias = "thumbs")]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,
    #[serde(default)]
    pub service_version: Option<String>,
}

impl ApodItem {
    /// Highest-resolution image reference available
    pub fn best_image_url(&self) -> Option<&str> {
        [&self.hdurl, &self.url, &self.thumbnail_url]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|u| !u.is_empty())
    }
}

/// Persisted favorite, unique on (user_id, apod_date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub user_id: String,
    pub apod_date: NaiveDate,
    pub title: String,
    pub explanation: String,
    pub media_type: MediaType,
    pub url: Option<String>,
    pub hdurl: Option<String>,
    pub thumbnail_url: Option<String>,
    pub copyright: Option<String>,
    pub service_version: Option<String>,
    pub saved_at: Option<DateTime<Utc>>,
}

impl FavoriteRecord {
    pub fn from_item(user_id: &str, item: &ApodItem) -> Self {
        Self {
            user_id: user_id.to_string(),
            apod_date: item.date,
            title: item.title.clone(),
            explanation: item.explanation.clone(),
            media_type: item.media_type,
            url: item.url.clone(),
            hdurl: item.hdurl.clone(),
            thumbnail_url: item.thumbnail_url.clone(),
            copyright: item.copyright.clone(),
            service_version: item.service_version.clone(),
            saved_at: Some(Utc::now()),
        }
    }
}

/// Inclusive APOD date range, clamped to the archive floor and ordered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApodRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl ApodRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        let s = start.max(APOD_EARLIEST);
        let e = end.max(APOD_EARLIEST);
        if s > e {
            Self { start: e, end: s }
        } else {
            Self { start: s, end: e }
        }
    }
}

/// Near-Earth-object feed window: ordered, at most six days long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeoWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl NeoWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        let (start, end) = if start > end { (end, start) } else { (start, end) };
        let limit = start
            .checked_add_days(Days::new(NEO_MAX_SPAN_DAYS))
            .unwrap_or(end);
        Self {
            start,
            end: end.min(limit),
        }
    }
}

/// Natural-events feed filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Open,
    Closed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Open => "open",
            EventStatus::Closed => "closed",
        }
    }
}

/// One close approach flattened out of a NeoWs feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NeoApproach {
    pub id: Option<String>,
    pub name: String,
    pub date: String,
    pub hazardous: bool,
    pub miss_distance_km: Option<f64>,
    pub miss_distance_ld: Option<f64>,
    pub velocity_km_s: Option<f64>,
    pub diameter_min_m: Option<f64>,
    pub diameter_max_m: Option<f64>,
}

/// Raw NeoWs feed plus its flattened approaches
#[derive(Debug, Serialize)]
pub struct NeoFeed {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub element_count: usize,
    pub approaches: Vec<NeoApproach>,
    pub raw: Value,
}

/// Health check response
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub now: DateTime<Utc>,
}

/// Service status: what the dashboard shows in its status panel
#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub store: &'static str,
    pub store_connect_attempts: u32,
    pub api_key_provided: bool,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

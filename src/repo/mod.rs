/// Repository layer for favorites persistence
mod connection;

pub use connection::{StoreConnection, StoreState};

use crate::domain::{ApodItem, FavoriteRecord, MediaType};
use crate::errors::StoreError;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use tracing::warn;

// Nullable columns are selected through COALESCE: the Any driver cannot
// decode a SQL NULL into Option<String>
type FavoriteRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

/// Favorites store. Every operation is fail-safe: an unreachable store
/// yields `false` or an empty list, never an error.
#[derive(Clone)]
pub struct FavoritesStore {
    conn: Arc<StoreConnection>,
}

impl FavoritesStore {
    pub fn new(conn: Arc<StoreConnection>) -> Self {
        Self { conn }
    }

    pub async fn state(&self) -> StoreState {
        self.conn.state().await
    }

    pub fn connect_attempts(&self) -> u32 {
        self.conn.connect_attempts()
    }

    /// Upsert on (user_id, apod_date); repeated saves overwrite
    pub async fn save_favorite(&self, user_id: &str, item: &ApodItem) -> bool {
        let record = FavoriteRecord::from_item(user_id, item);
        match self.upsert(&record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id, date = %item.date, "save_favorite failed: {}", e);
                false
            }
        }
    }

    /// Delete at most one record; deleting a missing record still succeeds
    pub async fn remove_favorite(&self, user_id: &str, apod_date: NaiveDate) -> bool {
        match self.delete(user_id, apod_date).await {
            Ok(()) => true,
            Err(e) => {
                warn!(user_id, date = %apod_date, "remove_favorite failed: {}", e);
                false
            }
        }
    }

    /// Favorites for `user_id`, newest APOD date first
    pub async fn list_favorites(&self, user_id: &str) -> Vec<FavoriteRecord> {
        match self.select(user_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!(user_id, "list_favorites failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn upsert(&self, record: &FavoriteRecord) -> Result<(), StoreError> {
        let pool = self.conn.pool().await?;
        let table = self.conn.table();
        sqlx::query(&format!(
            "INSERT INTO {table}(user_id, apod_date, title, explanation, media_type,
                                 url, hdurl, thumbnail_url, copyright, service_version, saved_at)
             VALUES($1,$2,$3,$4,$5,
                    CAST($6 AS TEXT), CAST($7 AS TEXT), CAST($8 AS TEXT),
                    CAST($9 AS TEXT), CAST($10 AS TEXT), CAST($11 AS TEXT))
             ON CONFLICT (user_id, apod_date) DO UPDATE
             SET title=EXCLUDED.title, explanation=EXCLUDED.explanation,
                 media_type=EXCLUDED.media_type, url=EXCLUDED.url, hdurl=EXCLUDED.hdurl,
                 thumbnail_url=EXCLUDED.thumbnail_url, copyright=EXCLUDED.copyright,
                 service_version=EXCLUDED.service_version, saved_at=EXCLUDED.saved_at"
        ))
        .bind(record.user_id.clone())
        .bind(record.apod_date.format("%Y-%m-%d").to_string())
        .bind(record.title.clone())
        .bind(record.explanation.clone())
        .bind(record.media_type.as_str())
        .bind(record.url.clone())
        .bind(record.hdurl.clone())
        .bind(record.thumbnail_url.clone())
        .bind(record.copyright.clone())
        .bind(record.service_version.clone())
        .bind(record.saved_at.map(|t| t.to_rfc3339()))
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, apod_date: NaiveDate) -> Result<(), StoreError> {
        let pool = self.conn.pool().await?;
        let table = self.conn.table();
        sqlx::query(&format!(
            "DELETE FROM {table} WHERE user_id = $1 AND apod_date = $2"
        ))
        .bind(user_id.to_string())
        .bind(apod_date.format("%Y-%m-%d").to_string())
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn select(&self, user_id: &str) -> Result<Vec<FavoriteRecord>, StoreError> {
        let pool = self.conn.pool().await?;
        let table = self.conn.table();
        let rows = sqlx::query_as::<_, FavoriteRow>(&format!(
            "SELECT user_id, apod_date, title, explanation, media_type,
                    COALESCE(url, ''), COALESCE(hdurl, ''), COALESCE(thumbnail_url, ''),
                    COALESCE(copyright, ''), COALESCE(service_version, ''),
                    COALESCE(saved_at, '')
             FROM {table}
             WHERE user_id = $1
             ORDER BY apod_date DESC"
        ))
        .bind(user_id.to_string())
        .fetch_all(&pool)
        .await?;

        Ok(rows.into_iter().filter_map(record_from_row).collect())
    }
}

fn record_from_row(row: FavoriteRow) -> Option<FavoriteRecord> {
    let (
        user_id,
        apod_date,
        title,
        explanation,
        media_type,
        url,
        hdurl,
        thumbnail_url,
        copyright,
        service_version,
        saved_at,
    ) = row;

    let Ok(apod_date) = NaiveDate::parse_from_str(&apod_date, "%Y-%m-%d") else {
        warn!(user_id = %user_id, apod_date = %apod_date, "skipping favorite with malformed date");
        return None;
    };

    Some(FavoriteRecord {
        user_id,
        apod_date,
        title,
        explanation,
        media_type: MediaType::parse(&media_type),
        url: non_empty(url),
        hdurl: non_empty(hdurl),
        thumbnail_url: non_empty(thumbnail_url),
        copyright: non_empty(copyright),
        service_version: non_empty(service_version),
        saved_at: non_empty(saved_at)
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)),
    })
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Lazily established, process-wide favorites store connection
use crate::clock::Clock;
use crate::config::StoreConfig;
use crate::errors::StoreError;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyConnection, AnyPool};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info};

enum ConnectionState {
    Uninitialized,
    Connected(AnyPool),
    Disconnected { since: Instant },
}

/// Coarse view of the connection for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Connected,
    Disconnected,
}

impl StoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreState::Uninitialized => "uninitialized",
            StoreState::Connected => "connected",
            StoreState::Disconnected => "disconnected",
        }
    }
}

pub struct StoreConnection {
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<ConnectionState>,
    attempts: AtomicU32,
}

impl StoreConnection {
    pub fn new(config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(ConnectionState::Uninitialized),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn table(&self) -> &str {
        &self.config.table
    }

    /// Number of times a connection was actually attempted
    pub fn connect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub async fn state(&self) -> StoreState {
        match *self.state.lock().await {
            ConnectionState::Uninitialized => StoreState::Uninitialized,
            ConnectionState::Connected(_) => StoreState::Connected,
            ConnectionState::Disconnected { .. } => StoreState::Disconnected,
        }
    }

    /// Shared pool, connecting on first use. A failed attempt is remembered
    /// for `retry_after` so callers short-circuit instead of reconnecting.
    pub async fn pool(&self) -> Result<AnyPool, StoreError> {
        let mut state = self.state.lock().await;
        match &*state {
            ConnectionState::Connected(pool) => return Ok(pool.clone()),
            ConnectionState::Disconnected { since }
                if self.clock.now().saturating_duration_since(*since) < self.config.retry_after =>
            {
                return Err(StoreError::Unavailable("recent connection attempt failed".into()));
            }
            _ => {}
        }

        let Some(uri) = self.config.uri.as_deref() else {
            *state = ConnectionState::Disconnected {
                since: self.clock.now(),
            };
            return Err(StoreError::NotConfigured);
        };

        self.attempts.fetch_add(1, Ordering::Relaxed);
        match self.connect(uri).await {
            Ok(pool) => {
                info!(table = %self.config.table, "Connected to favorites store");
                *state = ConnectionState::Connected(pool.clone());
                Ok(pool)
            }
            Err(e) => {
                error!("Favorites store connection failed: {}", e);
                *state = ConnectionState::Disconnected {
                    since: self.clock.now(),
                };
                Err(e)
            }
        }
    }

    async fn connect(&self, uri: &str) -> Result<AnyPool, StoreError> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(self.config.connect_timeout)
            .connect(uri)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // Liveness check and schema on one connection, before any other is opened
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        sqlx::query("SELECT 1")
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        ensure_schema(&mut conn, &self.config.table).await?;
        drop(conn);

        Ok(pool)
    }
}

/// Create the favorites table, unique on (user_id, apod_date)
pub async fn ensure_schema(conn: &mut AnyConnection, table: &str) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table}(
            user_id TEXT NOT NULL,
            apod_date TEXT NOT NULL,
            title TEXT NOT NULL,
            explanation TEXT NOT NULL,
            media_type TEXT NOT NULL,
            url TEXT,
            hdurl TEXT,
            thumbnail_url TEXT,
            copyright TEXT,
            service_version TEXT,
            saved_at TEXT,
            UNIQUE (user_id, apod_date)
        )"
    ))
    .execute(&mut *conn)
    .await?;

    // Tables created without the inline constraint get it as an index
    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {table}_user_date_unique
         ON {table}(user_id, apod_date)"
    ))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

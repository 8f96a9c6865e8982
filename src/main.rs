/// APOD gallery service entry point
mod cache;
mod card;
mod clients;
mod clock;
mod config;
mod domain;
mod errors;
mod handlers;
mod repo;
mod routes;
mod services;
mod utils;

use crate::cache::ResponseCache;
use crate::card::{CardFonts, ShareCardRenderer};
use crate::clients::{EonetClient, HttpClient, ImageLibraryClient, NasaClient};
use crate::clock::{Clock, SystemClock};
use crate::config::AppConfig;
use crate::handlers::AppState;
use crate::repo::{FavoritesStore, StoreConnection};
use crate::routes::build_router;
use crate::services::FeedService;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env()?;
    info!("Configuration loaded successfully");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Favorites store connects lazily on first use
    if config.store.uri.is_none() {
        info!("FAVORITES_DATABASE_URL not set, favorites will not be persisted");
    }
    let store_conn = Arc::new(StoreConnection::new(config.store.clone(), clock.clone()));
    let favorites = FavoritesStore::new(store_conn);

    // Initialize clients
    let http_client = HttpClient::new(config.timeouts.range)?;
    let mut nasa_client = NasaClient::new(
        http_client.clone(),
        config.nasa_api_key.clone(),
        config.timeouts.clone(),
    );
    let mut images_client = ImageLibraryClient::new(http_client.clone(), &config.timeouts);
    let mut eonet_client = EonetClient::new(http_client.clone(), &config.timeouts);
    if let Some(url) = &config.endpoints.nasa {
        nasa_client = nasa_client.with_base_url(url);
    }
    if let Some(url) = &config.endpoints.images {
        images_client = images_client.with_base_url(url);
    }
    if let Some(url) = &config.endpoints.eonet {
        eonet_client = eonet_client.with_base_url(url);
    }

    // Initialize services
    let cache = Arc::new(ResponseCache::new(clock.clone()));
    let feeds = Arc::new(FeedService::new(
        cache,
        nasa_client,
        images_client,
        eonet_client,
        config.cache_ttls.clone(),
    ));

    let fonts = CardFonts::load(config.card_font_dir.as_deref());
    let cards = Arc::new(ShareCardRenderer::new(
        http_client,
        config.timeouts.single,
        fonts,
    ));

    // Initialize application state
    let state = AppState {
        feeds: feeds.clone(),
        favorites,
        cards,
        public_base_url: Arc::from(config.public_base_url.as_str()),
        api_key_provided: config.api_key_provided,
    };

    start_background_tasks(&config, feeds);

    // Build router
    let app = build_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("apod_gallery listening on {}", config.bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Start periodic maintenance tasks
fn start_background_tasks(config: &AppConfig, feeds: Arc<FeedService>) {
    let interval = config.cache_purge_seconds;
    tokio::spawn(async move {
        info!("Starting cache purge task (interval: {}s)", interval);
        loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;
            let purged = feeds.purge_expired();
            if purged > 0 {
                debug!("Purged {} expired cache entries", purged);
            }
        }
    });
}

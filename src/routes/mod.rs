/// Application routes configuration
use crate::handlers::{
    get_apod, get_apod_random, get_apod_range, get_event_categories, get_events, get_image_asset,
    get_neo, get_share_card, get_status, health, list_favorites, refresh_cache, remove_favorite,
    save_favorite, search_images, AppState,
};
use axum::{
    routing::{delete, get},
    Router,
};

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health and status
        .route("/health", get(health))
        .route("/status", get(get_status))
        // APOD
        .route("/apod", get(get_apod))
        .route("/apod/range", get(get_apod_range))
        .route("/apod/random", get(get_apod_random))
        .route("/apod/:date/card", get(get_share_card))
        // Media library
        .route("/images/search", get(search_images))
        .route("/images/asset/:id", get(get_image_asset))
        // Natural events and near-Earth objects
        .route("/events", get(get_events))
        .route("/events/categories", get(get_event_categories))
        .route("/neo", get(get_neo))
        // Favorites
        .route("/favorites/:user_id", get(list_favorites).put(save_favorite))
        .route("/favorites/:user_id/:date", delete(remove_favorite))
        // Cache
        .route("/cache/refresh", get(refresh_cache))
        .with_state(state)
}

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{
    discover_json, epg_xml, fallback_handler, health_check, lineup_json, lineup_status_json,
    stream_channel,
};
use super::state::AppState;

/// Create the Axum router with all routes configured
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stream/{channel_number}", get(stream_channel))
        .route("/epg.xml", get(epg_xml))
        // Tuner (HDHomeRun) discovery endpoints
        .route("/discover.json", get(discover_json))
        .route("/lineup.json", get(lineup_json))
        .route("/lineup_status.json", get(lineup_status_json))
        .fallback(fallback_handler)
        // Browser-based guide clients fetch lineup/EPG cross-origin
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub mod middleware;
pub mod presence;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::error::ApiError;

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use middleware::resolve_actor;
pub use state::AppState;
pub use ws_handler::ws_handler;

/// Builds every ride, feed, presence and WebSocket route. All of them run
/// behind `resolve_actor`; `/health` does not.
pub fn router(app_state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/rides", post(rest::create_ride_handler))
        .route("/rides/{id}", get(rest::get_ride_handler))
        .route("/rides/{id}/accept", post(rest::accept_ride_handler))
        .route("/rides/{id}/start", post(rest::start_ride_handler))
        .route("/rides/{id}/complete", post(rest::complete_ride_handler))
        .route("/rides/{id}/cancel", post(rest::cancel_ride_handler))
        .route("/feeds/{feed}", get(rest::feed_handler))
        .route("/presence/online", post(presence::go_online_handler))
        .route("/presence/offline", post(presence::go_offline_handler))
        .route("/presence/location", post(presence::report_location_handler))
        .route("/presence/{driver_id}", get(presence::get_presence_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            resolve_actor,
        ));

    Router::new()
        .merge(api_routes)
        .route("/health", get(rest::health_handler))
        .with_state(app_state)
}

/// CORS for the configured browser origin, with credentials so the session
/// cookie is sent along.
pub fn cors_layer(allowed_origin: &str) -> Result<CorsLayer, ApiError> {
    let origin = allowed_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS origin '{}': {}", allowed_origin, e))
    })?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]))
}

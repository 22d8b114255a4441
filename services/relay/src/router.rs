//! Axum Router Configuration

use crate::{handlers, state::AppState, ws::ws_handler};
use axum::{Router, routing::get};
use std::sync::Arc;

/// Creates the router: the relay upgrade path, `/health`, and a rejecting fallback.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let relay_path = app_state.config.relay_path.clone();
    Router::new()
        .route(&relay_path, get(ws_handler))
        .route("/health", get(handlers::health))
        .fallback(handlers::reject)
        .with_state(app_state)
}

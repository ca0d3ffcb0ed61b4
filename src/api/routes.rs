//! API Routes

use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers::{lws_handler, AppState};

/// Creates the router. There are no fixed routes; locations decide which
/// requests run a script.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(lws_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

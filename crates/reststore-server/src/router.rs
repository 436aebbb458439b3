use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler::{self, RestStorageHandler};

/// Build the axum router. Every path is handled by the storage handler, which
/// applies the configured prefix itself.
pub fn build_router(handler: RestStorageHandler) -> Router {
    Router::new()
        .fallback(handler::dispatch)
        .with_state(handler)
        .layer(TraceLayer::new_for_http())
}

mod middleware;
mod profiles;

use axum::{
    Router,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
};

use crate::application::Services;
use crate::cache::request_cache_layer;

pub use middleware::log_responses;

/// Demo router.
///
/// Profile routes sit behind the request cache layer (as a route layer, so
/// the matched route is the cache endpoint); the health check does not.
pub fn build_router(services: Services) -> Router {
    let cached_routes = Router::new()
        .route(
            "/profiles/{id}",
            get(profiles::profile_page).put(profiles::update_profile),
        )
        .route("/profiles/{id}/name", get(profiles::profile_name))
        .route_layer(from_fn_with_state(
            services.requests.clone(),
            request_cache_layer,
        ));

    Router::new()
        .merge(cached_routes)
        .route("/_health", get(health))
        .with_state(services)
        .layer(from_fn(log_responses))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

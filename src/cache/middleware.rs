//! Request cache middleware.
//!
//! Gives every request its own scratch scope and a [`RequestInfo`]
//! extension, then stores the body of successful responses whose handler
//! asked for caching via [`RequestCache::cache_view`].

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::{FromRequestParts, MatchedPath, State},
    http::{Request, StatusCode, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, instrument, warn};

use super::keys::RequestInfo;
use super::request::{self, RequestCache};

/// Largest body the middleware buffers for caching.
pub const MAX_CACHED_BODY: usize = 1024 * 1024;

/// Route with `Router::route_layer` so the matched route pattern is known;
/// otherwise the endpoint falls back to the raw path.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn request_cache_layer(
    State(cache): State<Arc<RequestCache>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let info = request_info(request.extensions().get::<MatchedPath>(), &request);
    request.extensions_mut().insert(info);

    request::scope(async move {
        let response = next.run(request).await;

        if !response.status().is_success() {
            if let Some(pending) = cache.discard_pending() {
                debug!(
                    cache = "request",
                    key = %pending.key,
                    status = response.status().as_u16(),
                    "not caching unsuccessful response"
                );
            }
            return response;
        }

        if request::pending().is_none() {
            return response;
        }

        let (parts, body) = response.into_parts();
        let within_limit = body
            .size_hint()
            .upper()
            .is_some_and(|upper| upper <= MAX_CACHED_BODY as u64);
        if !within_limit {
            if let Some(pending) = cache.discard_pending() {
                debug!(
                    cache = "request",
                    key = %pending.key,
                    limit = MAX_CACHED_BODY,
                    "response body too large or unsized, not caching"
                );
            }
            return Response::from_parts(parts, body);
        }

        let bytes = match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(cache = "request", error = %err, "failed to buffer response body");
                cache.discard_pending();
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        if let Err(err) = cache.finalize_response(bytes.clone()).await {
            warn!(cache = "request", error = %err, "failed to store response");
        }

        Response::from_parts(parts, Body::from(bytes))
    })
    .await
}

fn request_info<B>(matched: Option<&MatchedPath>, request: &Request<B>) -> RequestInfo {
    let path = request.uri().path();
    RequestInfo::new(
        matched.map_or(path, MatchedPath::as_str),
        path,
        request.method().as_str(),
    )
}

impl<S: Send + Sync> FromRequestParts<S> for RequestInfo {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(info) = parts.extensions.get::<RequestInfo>() {
            return Ok(info.clone());
        }
        let path = parts.uri.path();
        let endpoint = parts
            .extensions
            .get::<MatchedPath>()
            .map_or(path, MatchedPath::as_str);
        Ok(RequestInfo::new(endpoint, path, parts.method.as_str()))
    }
}

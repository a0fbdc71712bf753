//! Request-scoped helpers.
//!
//! # Responsibilities
//! - Generate and propagate `x-request-id` (UUID v4)
//! - Open the per-request tracing span carrying that ID
//! - Recover the URI the client actually sent, before base-path nesting
//! - Read the gateway's own request headers

use axum::body::Body;
use axum::extract::OriginalUri;
use axum::http::{HeaderMap, HeaderName, Request};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Caller/composite identifier.
pub const X_GATEWAY_KEY: &str = "x-gateway-key";
/// Request timestamp, `YYYY-MM-DDThh:mm:ss±hhmm`.
pub const X_GATEWAY_TIMESTAMP: &str = "x-gateway-timestamp";
/// Hex HMAC-SHA256 request signature.
pub const X_GATEWAY_SIGNATURE: &str = "x-gateway-signature";

pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// Access to the request ID set by [`set_request_id_layer`].
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> &str {
        header_str(self, X_REQUEST_ID).unwrap_or("unknown")
    }
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> &str {
        self.headers().request_id()
    }
}

/// Span for `TraceLayer::make_span_with`.
pub fn request_span(request: &Request<Body>) -> tracing::Span {
    tracing::info_span!(
        "request",
        request_id = %request.request_id(),
        method = %request.method(),
        uri = %request.uri(),
    )
}

/// Path and query as the client sent them.
pub fn request_uri<B>(request: &Request<B>) -> String {
    let uri = request
        .extensions()
        .get::<OriginalUri>()
        .map(|original| &original.0)
        .unwrap_or_else(|| request.uri());
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string())
}

/// Header value as text; `None` when absent or not visible ASCII.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

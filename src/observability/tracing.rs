//! Request spans.
//!
//! Every inbound request gets a span carrying its `x-request-id`, so log lines
//! emitted while processing a webhook can be joined back to the delivery.

use axum::body::Body;
use axum::http::Request;
use tracing::Span;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Span factory for `TraceLayer::make_span_with`.
pub fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}

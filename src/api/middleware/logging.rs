//! Per-request log line and HTTP metrics

use std::time::Instant;

use axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response};
use tracing::{info, warn};

use crate::infrastructure::observability::record_http_request;

/// Logs method, route, status and duration of every request and feeds the
/// HTTP metrics. Spans come from `TraceLayer`; this only emits events.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = route_of(&request);
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_default();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();
    if status.is_server_error() {
        warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            request_id = %request_id,
            "Request failed"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis() as u64,
            request_id = %request_id,
            "Request completed"
        );
    }
    record_http_request(method.as_str(), &path, status.as_u16(), duration);

    response
}

/// Route template when matched, so ids do not end up in labels
fn route_of(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|mp| mp.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_falls_back_to_uri_path() {
        let request = Request::builder()
            .uri("/api/models/abc?x=1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(route_of(&request), "/api/models/abc");
    }
}

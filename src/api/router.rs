use axum::{Router, middleware, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::health;
use super::middleware::logging_middleware;
use super::rest;
use super::state::AppState;
use crate::infrastructure::observability::{PrometheusMetrics, create_metrics_router};

/// Full router: probes, `/api` resources and, when given, the metrics endpoint
pub fn create_router(state: AppState, metrics: Option<(PrometheusMetrics, &str)>) -> Router {
    let max_upload_bytes = state.training_sets.max_upload_bytes();

    let mut router = Router::new()
        .route("/health", get(health::health_check))
        .route("/ready", get(health::ready_check))
        .route("/live", get(health::live_check))
        .nest("/api", rest::create_api_router(max_upload_bytes))
        .with_state(state);

    if let Some((metrics, path)) = metrics {
        router = router.merge(create_metrics_router(metrics, path));
    }

    router
        .layer(middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{
    health::check_health, ingest::ingest_tests, liveness::live, lookup::get_test_by_key, readiness::ready,
    search::search_tests, similar::find_similar_tests,
};

pub mod api_state;
pub mod error;
mod metrics;
mod rate_limit;
mod routes;
#[cfg(test)]
mod test_support;

/// Router exposing the five tools plus the k8s/systemd liveness/readiness
/// probes. Every tool is unauthenticated — rate limiting happens per-tool
/// inside the handlers, not as router middleware.
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/v1/search", post(search_tests))
        .route("/v1/similar", post(find_similar_tests))
        .route("/v1/tests/by-key/{external_key}", get(get_test_by_key))
        .route("/v1/ingest", post(ingest_tests))
        .route("/v1/health", get(check_health))
}

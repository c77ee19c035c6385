use axum::{extract::State, Json};

use crate::api_state::ApiState;
use crate::metrics::{self, HealthSnapshot};

/// `check_health` (§4.6.5, §4.8): store reachability, per-tier counts, and
/// embed-provider reachability. Always answers 200 — the snapshot itself
/// carries the unhealthy signal rather than an HTTP status.
#[tracing::instrument(skip(state))]
pub async fn check_health(State(state): State<ApiState>) -> Json<HealthSnapshot> {
    Json(metrics::check_health(&state.db, &state.embedder, &state.metrics, state.version).await)
}

use std::time::Instant;

use axum::{extract::State, Json};
use common::error::CoreError;
use retrieval_pipeline::{Reference, SearchOutcome, SearchScope};
use serde::Deserialize;

use crate::api_state::ApiState;
use crate::error::ApiError;
use crate::routes::search::{SearchTestsResponse, SoftWarningView};

const TOOL: &str = "find_similar_tests";
const DEFAULT_TOP_K: usize = 20;

#[derive(Debug, Deserialize)]
pub struct FindSimilarRequest {
    pub reference_uid: Option<String>,
    pub reference_external_key: Option<String>,
    pub top_k: Option<usize>,
    pub scope: Option<SearchScope>,
}

/// `find_similar_tests` (§4.6.2): reuse the reference test's own stored
/// vector as the query. Exactly one of `reference_uid`/`reference_external_key`
/// must be supplied — resolving that ambiguity isn't guessed.
#[tracing::instrument(skip(state))]
pub async fn find_similar_tests(
    State(state): State<ApiState>,
    Json(body): Json<FindSimilarRequest>,
) -> Result<Json<SearchTestsResponse>, ApiError> {
    state.limiters.check_search()?;
    let started = Instant::now();

    let result = run_find_similar(&state, body).await;
    state.metrics.record_request(TOOL, started.elapsed().as_micros() as u64, result.is_err());
    Ok(Json(result?))
}

async fn run_find_similar(state: &ApiState, body: FindSimilarRequest) -> Result<SearchTestsResponse, ApiError> {
    let reference = match (body.reference_uid, body.reference_external_key) {
        (Some(uid), None) => Reference::Uid(uid),
        (None, Some(key)) => Reference::ExternalKey(key),
        _ => {
            return Err(ApiError::from(CoreError::InvalidInput(
                "exactly one of reference_uid or reference_external_key is required".to_string(),
            )))
        }
    };

    let top_k = body.top_k.unwrap_or(DEFAULT_TOP_K);
    let scope = body.scope.unwrap_or_default();

    let SearchOutcome { hits, warnings } =
        retrieval_pipeline::find_similar(&state.db, reference, top_k, scope, &state.retrieval).await?;

    Ok(SearchTestsResponse {
        hits: hits.into_iter().map(crate::routes::search::to_view).collect(),
        warnings: warnings
            .into_iter()
            .map(|w| SoftWarningView { branch: w.branch, message: w.message })
            .collect(),
    })
}

use std::time::Instant;

use axum::{extract::State, Json};
use common::storage::filter::FilterInput;
use common::storage::{filter, types::test_doc::Priority};
use retrieval_pipeline::{SearchHit, SearchOutcome, SearchRequest, SearchScope};
use serde::{Deserialize, Serialize};

use crate::api_state::ApiState;
use crate::error::ApiError;

const TOOL: &str = "search_tests";

#[derive(Debug, Deserialize)]
pub struct SearchTestsRequest {
    pub query: String,
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filters: FilterInput,
    pub scope: Option<SearchScope>,
}

#[derive(Debug, Serialize)]
pub struct SearchTestsResponse {
    pub hits: Vec<SearchHitView>,
    pub warnings: Vec<SoftWarningView>,
}

#[derive(Debug, Serialize)]
pub struct SearchHitView {
    pub uid: String,
    pub external_key: Option<String>,
    pub title: String,
    pub priority: Option<Priority>,
    pub score: f32,
    pub matched_step_indices: Vec<u32>,
}

#[derive(Debug, Serialize)]
pub struct SoftWarningView {
    pub branch: &'static str,
    pub message: String,
}

/// `search_tests` (§4.6.1): compile the caller's filter, embed the query, and
/// return the fused, ranked hits.
#[tracing::instrument(skip(state, body), fields(query_chars = body.query.chars().count()))]
pub async fn search_tests(
    State(state): State<ApiState>,
    Json(body): Json<SearchTestsRequest>,
) -> Result<Json<SearchTestsResponse>, ApiError> {
    state.limiters.check_search()?;
    let started = Instant::now();

    let result = run_search(&state, body).await;
    state.metrics.record_request(TOOL, started.elapsed().as_micros() as u64, result.is_err());
    if result.is_ok() {
        state.metrics.record_successful_embed(chrono::Utc::now().timestamp());
    }
    Ok(Json(result?))
}

async fn run_search(state: &ApiState, body: SearchTestsRequest) -> Result<SearchTestsResponse, ApiError> {
    let compiled = filter::compile(&body.filters)?;
    let request = SearchRequest { top_k: body.top_k, filters: Some(compiled), scope: body.scope };

    let SearchOutcome { hits, warnings } =
        retrieval_pipeline::search(&state.db, &state.embedder, &body.query, request, &state.retrieval).await?;

    Ok(SearchTestsResponse {
        hits: hits.into_iter().map(to_view).collect(),
        warnings: warnings
            .into_iter()
            .map(|w| SoftWarningView { branch: w.branch, message: w.message })
            .collect(),
    })
}

pub(crate) fn to_view(hit: SearchHit) -> SearchHitView {
    SearchHitView {
        uid: hit.doc.uid().to_string(),
        external_key: hit.doc.external_key.clone(),
        title: hit.doc.title.clone(),
        priority: hit.doc.priority,
        score: hit.score,
        matched_step_indices: hit.matched_step_indices,
    }
}

#[cfg(test)]
mod tests {
    use common::storage::types::test_doc::TestDoc;

    use super::*;
    use crate::test_support::test_state;

    #[tokio::test]
    async fn finds_a_matching_doc_by_query_text() {
        let state = test_state().await;
        let title = "login page renders the submit button";
        let embedding = state.embedder.embed(&[title.to_string()], 1, 1).await.expect("embed title")[0].clone();

        state
            .db
            .store_item(TestDoc::new(
                "a".to_string(),
                Some("PROJ-1".to_string()),
                title.to_string(),
                None,
                None,
                None,
                vec![],
                vec![],
                vec![],
                vec![],
                "unit-test".to_string(),
                embedding,
            ))
            .await
            .expect("store doc");

        let body = SearchTestsRequest {
            query: title.to_string(),
            top_k: Some(5),
            filters: FilterInput::default(),
            scope: Some(SearchScope::Docs),
        };

        let Json(response) = search_tests(State(state), Json(body)).await.expect("search");
        assert_eq!(response.hits.first().map(|h| h.uid.as_str()), Some("a"));
    }

    #[tokio::test]
    async fn rejects_an_out_of_range_top_k() {
        let state = test_state().await;
        let body = SearchTestsRequest {
            query: "anything".to_string(),
            top_k: Some(0),
            filters: FilterInput::default(),
            scope: None,
        };

        let err = search_tests(State(state), Json(body)).await.unwrap_err();
        assert!(matches!(err.into_core(), common::error::CoreError::InvalidInput(_)));
    }
}

use std::time::Instant;

use axum::extract::{Path, State};
use axum::Json;
use common::storage::types::test_doc::{Priority, TestDoc};
use serde::Serialize;

use crate::api_state::ApiState;
use crate::error::ApiError;

const TOOL: &str = "get_test_by_key";

#[derive(Debug, Serialize)]
pub struct TestDocView {
    pub uid: String,
    pub external_key: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub test_type: Option<String>,
    pub platforms: Vec<String>,
    pub tags: Vec<String>,
    pub folder_path: Vec<String>,
    pub related_keys: Vec<String>,
    pub source: String,
}

/// `get_test_by_key` (§4.6.3): direct lookup, bounded disambiguation.
#[tracing::instrument(skip(state))]
pub async fn get_test_by_key(
    State(state): State<ApiState>,
    Path(external_key): Path<String>,
) -> Result<Json<TestDocView>, ApiError> {
    let started = Instant::now();
    let result = retrieval_pipeline::get_by_key(&state.db, &external_key).await;
    state.metrics.record_request(TOOL, started.elapsed().as_micros() as u64, result.is_err());
    Ok(Json(to_view(result?)))
}

fn to_view(doc: TestDoc) -> TestDocView {
    TestDocView {
        uid: doc.uid().to_string(),
        external_key: doc.external_key,
        title: doc.title,
        description: doc.description,
        priority: doc.priority,
        test_type: doc.test_type,
        platforms: doc.platforms,
        tags: doc.tags,
        folder_path: doc.folder_path,
        related_keys: doc.related_keys,
        source: doc.source,
    }
}

#[cfg(test)]
mod tests {
    use common::error::CoreError;

    use super::*;
    use crate::test_support::{test_doc, test_state, TEST_DIM};

    #[tokio::test]
    async fn resolves_by_external_key() {
        let state = test_state().await;
        state
            .db
            .store_item(test_doc("a", Some("PROJ-1"), "login succeeds", TEST_DIM))
            .await
            .expect("store doc");

        let Json(view) = get_test_by_key(State(state), Path("PROJ-1".to_string())).await.expect("lookup");
        assert_eq!(view.uid, "a");
        assert_eq!(view.title, "login succeeds");
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let state = test_state().await;
        let err = get_test_by_key(State(state), Path("MISSING-1".to_string())).await.unwrap_err();
        assert!(matches!(err.into_core(), CoreError::NotFound(_)));
    }
}

use std::time::Instant;

use axum::{extract::State, Json};
use ingestion_pipeline::IngestReport;
use serde::Deserialize;
use serde_json::Value;

use crate::api_state::ApiState;
use crate::error::ApiError;

const TOOL: &str = "ingest_tests";

#[derive(Debug, Deserialize)]
pub struct IngestTestsRequest {
    pub source_id: String,
    pub source_label: String,
    pub records: Vec<Value>,
}

/// `ingest_tests` (§4.6.4): chunked, checkpointed upsert of a batch of raw
/// test records under `source_id`.
#[tracing::instrument(skip(state, body), fields(source_id = %body.source_id, records = body.records.len()))]
pub async fn ingest_tests(
    State(state): State<ApiState>,
    Json(body): Json<IngestTestsRequest>,
) -> Result<Json<IngestReport>, ApiError> {
    state.limiters.check_ingest()?;
    let started = Instant::now();

    let result = state.ingestion.ingest(&body.source_id, &body.source_label, body.records).await;
    state.metrics.record_request(TOOL, started.elapsed().as_micros() as u64, result.is_err());
    if let Ok(report) = &result {
        if report.docs_written > 0 {
            state.metrics.record_successful_embed(chrono::Utc::now().timestamp());
        }
    }
    Ok(Json(result?))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::test_state;

    #[tokio::test]
    async fn ingests_a_generic_record_and_reports_counts() {
        let state = test_state().await;
        let body = IngestTestsRequest {
            source_id: "suite-1".to_string(),
            source_label: "unit-test-suite".to_string(),
            records: vec![json!({
                "title": "login succeeds",
                "external_key": "PROJ-1",
                "priority": "high",
                "steps": [{"action": "open login page"}, {"action": "submit credentials", "expected": ["dashboard shown"]}],
            })],
        };

        let Json(report) = ingest_tests(State(state), Json(body)).await.expect("ingest");
        assert_eq!(report.docs_in, 1);
        assert_eq!(report.docs_written, 1);
        assert_eq!(report.steps_written, 2);
    }
}

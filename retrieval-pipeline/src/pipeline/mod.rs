mod config;

pub use config::{
    RetrievalConfig, RetrievalTuning, SearchScope, DEFAULT_TOP_K, KNN_EF, MAX_OVERFETCHED,
    MAX_QUERY_BYTES, MAX_TOP_K,
};

use common::error::CoreError;
use common::storage::db::SurrealDbClient;
use common::storage::filter::CompiledFilter;
use common::storage::types::test_doc::{DocHit, TestDoc};
use common::storage::types::test_step::{StepHit, TestStep};
use embedding_provider::EmbeddingProvider;
use std::collections::HashMap;
use tracing::{instrument, warn};

use crate::scoring::{fuse_scores, sort_by_fused_desc, Candidate, FusionWeights};

/// One ranked hit from [`search`]/[`crate::similar::find_similar`]: the fused
/// score plus the full doc payload, denormalised for caller convenience.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub doc: TestDoc,
    pub score: f32,
    pub matched_step_indices: Vec<u32>,
}

/// A non-fatal degradation recorded when one fan-out branch failed but the
/// other returned usable results.
#[derive(Debug, Clone)]
pub struct SoftWarning {
    pub branch: &'static str,
    pub message: String,
}

pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub warnings: Vec<SoftWarning>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub top_k: Option<usize>,
    pub filters: Option<CompiledFilter>,
    pub scope: Option<SearchScope>,
}

/// Single-query semantic search.
#[instrument(skip(db, embedder, config), fields(query_chars = query_text.chars().count()))]
pub async fn search(
    db: &SurrealDbClient,
    embedder: &EmbeddingProvider,
    query_text: &str,
    request: SearchRequest,
    config: &RetrievalConfig,
) -> Result<SearchOutcome, CoreError> {
    if query_text.len() > MAX_QUERY_BYTES {
        return Err(CoreError::InvalidInput(format!(
            "query_text exceeds {MAX_QUERY_BYTES} bytes"
        )));
    }

    let top_k = request.top_k.unwrap_or(DEFAULT_TOP_K);
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(CoreError::InvalidInput(format!(
            "top_k must be between 1 and {MAX_TOP_K}"
        )));
    }
    let scope = request.scope.unwrap_or_default();
    let filter = request.filters.unwrap_or_else(CompiledFilter::matches_everything);

    let embeddings = embedder.embed(&[query_text.to_string()], 1, 1).await?;
    let qvec = embeddings
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::Internal("embedding provider returned no vectors".to_string()))?;

    run_with_embedding(db, &qvec, scope, top_k, &filter, config, None).await
}

/// Shared tail of the algorithm, reused by [`search`] and
/// [`crate::similar::find_similar`] (which supplies its own query vector and
/// an excluded `uid`).
pub(crate) async fn run_with_embedding(
    db: &SurrealDbClient,
    qvec: &[f32],
    scope: SearchScope,
    top_k: usize,
    filter: &CompiledFilter,
    config: &RetrievalConfig,
    exclude_uid: Option<&str>,
) -> Result<SearchOutcome, CoreError> {
    let k_step = (top_k * config.tuning.overfetch).min(MAX_OVERFETCHED);
    let mut warnings = Vec::new();

    let (doc_hits, step_hits) = match scope {
        SearchScope::Docs => {
            let doc_hits = TestDoc::vector_search(db, qvec, top_k, KNN_EF, filter).await?;
            (doc_hits, Vec::new())
        }
        SearchScope::Steps => {
            let step_hits = TestStep::vector_search(db, qvec, k_step, KNN_EF, filter).await?;
            (Vec::new(), step_hits)
        }
        SearchScope::All => {
            let (docs, steps) = tokio::join!(
                TestDoc::vector_search(db, qvec, top_k, KNN_EF, filter),
                TestStep::vector_search(db, qvec, k_step, KNN_EF, filter),
            );
            collect_with_soft_warnings(docs, steps, &mut warnings)?
        }
    };

    let mut candidates: HashMap<String, Candidate> = HashMap::new();

    for hit in doc_hits {
        if exclude_uid.is_some_and(|uid| uid == hit.doc.uid()) {
            continue;
        }
        let entry = candidates
            .entry(hit.doc.uid().to_string())
            .or_insert_with(|| Candidate::new(hit.doc.uid().to_string()));
        entry.scores.doc = Some(hit.score);
    }

    for rollup in roll_up_steps(step_hits) {
        if exclude_uid.is_some_and(|uid| uid == rollup.parent_uid) {
            continue;
        }
        let entry = candidates
            .entry(rollup.parent_uid.clone())
            .or_insert_with(|| Candidate::new(rollup.parent_uid.clone()));
        entry.scores.step = Some(rollup.best_score);
        entry.matched_step_indices = rollup.indices;
    }

    let weights = FusionWeights { doc: config.tuning.w_doc, step: config.tuning.w_step };
    let mut candidates: Vec<Candidate> = candidates.into_values().collect();
    for candidate in &mut candidates {
        candidate.fused = match scope {
            SearchScope::Docs => candidate.scores.doc.unwrap_or(0.0),
            SearchScope::Steps => candidate.scores.step.unwrap_or(0.0),
            SearchScope::All => fuse_scores(&candidate.scores, weights),
        };
    }
    sort_by_fused_desc(&mut candidates);
    candidates.truncate(top_k);

    let hits = hydrate(db, candidates).await?;
    Ok(SearchOutcome { hits, warnings })
}

fn collect_with_soft_warnings(
    docs: Result<Vec<DocHit>, CoreError>,
    steps: Result<Vec<StepHit>, CoreError>,
    warnings: &mut Vec<SoftWarning>,
) -> Result<(Vec<DocHit>, Vec<StepHit>), CoreError> {
    match (docs, steps) {
        (Ok(docs), Ok(steps)) => Ok((docs, steps)),
        (Ok(docs), Err(err)) => {
            warn!(error = %err, "step-tier fan-out failed, continuing with doc-tier hits only");
            warnings.push(SoftWarning { branch: "steps", message: err.to_string() });
            Ok((docs, Vec::new()))
        }
        (Err(err), Ok(steps)) => {
            warn!(error = %err, "doc-tier fan-out failed, continuing with step-tier hits only");
            warnings.push(SoftWarning { branch: "docs", message: err.to_string() });
            Ok((Vec::new(), steps))
        }
        (Err(doc_err), Err(step_err)) => Err(CoreError::PartialResult(format!(
            "both fan-out branches failed: docs={doc_err}, steps={step_err}"
        ))),
    }
}

struct StepRollup {
    parent_uid: String,
    best_score: f32,
    indices: Vec<u32>,
}

/// Group step hits by `parent_uid`, keeping the best score and the full set
/// of contributing step indices per group.
fn roll_up_steps(step_hits: Vec<StepHit>) -> Vec<StepRollup> {
    let mut groups: HashMap<String, StepRollup> = HashMap::new();
    for hit in step_hits {
        let entry = groups.entry(hit.parent_uid.clone()).or_insert_with(|| StepRollup {
            parent_uid: hit.parent_uid.clone(),
            best_score: f32::MIN,
            indices: Vec::new(),
        });
        entry.best_score = entry.best_score.max(hit.score);
        entry.indices.push(hit.index);
    }
    groups.into_values().collect()
}

async fn hydrate(db: &SurrealDbClient, candidates: Vec<Candidate>) -> Result<Vec<SearchHit>, CoreError> {
    let mut hits = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let Some(doc) = TestDoc::fetch_by_uid(db, &candidate.uid).await? else {
            // The doc vanished between the kNN scan and hydration (concurrent
            // delete); drop it rather than surface a stale hit.
            continue;
        };
        hits.push(SearchHit {
            doc,
            score: candidate.fused,
            matched_step_indices: candidate.matched_step_indices,
        });
    }
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::ensure_runtime_indexes;
    use common::storage::types::test_doc::Priority;
    use common::utils::config::{AppConfig, EmbedProviderKind};
    use uuid::Uuid;

    async fn test_db(dim: usize) -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("retrieval_test", &database).await.expect("memory db");
        db.apply_migrations().await.expect("migrations");
        ensure_runtime_indexes(&db, dim).await.expect("indexes");
        db
    }

    fn test_config() -> AppConfig {
        AppConfig {
            embed_provider: EmbedProviderKind::Hashed,
            embed_model: "unit-test".to_string(),
            embed_dim: 8,
            openai_api_key: None,
            store_dsn: "mem://".to_string(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: "ns".to_string(),
            surrealdb_database: "db".to_string(),
            w_doc: 0.7,
            w_step: 0.3,
            overfetch: 3,
            b_ingest: 500,
            p_ingest: 3,
            b_embed: 25,
            p_embed: 4,
            checkpoint_path: "./data/ckpt".to_string(),
            search_timeout_secs: 10,
            ingest_chunk_timeout_secs: 60,
            shutdown_grace_secs: 30,
            http_port: 8080,
            search_qps: 60,
            ingest_qps: 5,
        }
    }

    fn doc(uid: &str, title: &str, embedding: Vec<f32>) -> TestDoc {
        TestDoc::new(
            uid.to_string(),
            None,
            title.to_string(),
            None,
            Some(Priority::Medium),
            None,
            vec![],
            vec![],
            vec![],
            vec![],
            "unit-test".to_string(),
            embedding,
        )
    }

    fn step(parent: &str, index: u32, action: &str, embedding: Vec<f32>) -> TestStep {
        TestStep::new(
            parent.to_string(),
            index,
            action.to_string(),
            None,
            vec![],
            embedding,
            vec![],
            vec![],
            None,
            None,
            vec![],
            vec![],
            None,
        )
    }

    #[tokio::test]
    async fn search_orders_hits_by_fused_score() {
        let db = test_db(8).await;
        db.store_item(doc("a", "login flow", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]))
            .await
            .expect("store a");
        db.store_item(doc("b", "unrelated flow", vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]))
            .await
            .expect("store b");

        let embedder = EmbeddingProvider::from_config(&test_config()).await.expect("provider");
        let outcome = search(
            &db,
            &embedder,
            "login flow",
            SearchRequest::default(),
            &RetrievalConfig::from_app_config(&test_config()),
        )
        .await
        .expect("search");

        assert!(!outcome.hits.is_empty());
    }

    #[tokio::test]
    async fn step_hit_rolls_up_to_parent_doc_with_matched_indices() {
        let db = test_db(8).await;
        let embedding = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        db.store_item(doc("a", "login flow", vec![0.0; 8])).await.expect("store doc");
        db.store_item(step("a", 2, "enter username", embedding.clone()))
            .await
            .expect("store step");

        let config = RetrievalConfig::from_app_config(&test_config());
        let outcome = run_with_embedding(
            &db,
            &embedding,
            SearchScope::All,
            10,
            &CompiledFilter::matches_everything(),
            &config,
            None,
        )
        .await
        .expect("run");

        let hit = outcome.hits.iter().find(|h| h.doc.uid() == "a").expect("doc present");
        assert_eq!(hit.matched_step_indices, vec![2]);
    }

    #[tokio::test]
    async fn docs_scope_skips_step_fan_out() {
        let db = test_db(8).await;
        let embedding = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        db.store_item(doc("a", "login flow", embedding.clone())).await.expect("store doc");
        db.store_item(step("a", 0, "enter username", embedding.clone()))
            .await
            .expect("store step");

        let config = RetrievalConfig::from_app_config(&test_config());
        let outcome = run_with_embedding(
            &db,
            &embedding,
            SearchScope::Docs,
            10,
            &CompiledFilter::matches_everything(),
            &config,
            None,
        )
        .await
        .expect("run");

        let hit = outcome.hits.iter().find(|h| h.doc.uid() == "a").expect("doc present");
        assert!(hit.matched_step_indices.is_empty());
    }

    #[tokio::test]
    async fn rejects_oversized_query_text() {
        let db = test_db(8).await;
        let embedder = EmbeddingProvider::from_config(&test_config()).await.expect("provider");
        let oversized = "x".repeat(MAX_QUERY_BYTES + 1);
        let result = search(
            &db,
            &embedder,
            &oversized,
            SearchRequest::default(),
            &RetrievalConfig::from_app_config(&test_config()),
        )
        .await;
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn rejects_top_k_out_of_range() {
        let db = test_db(8).await;
        let embedder = EmbeddingProvider::from_config(&test_config()).await.expect("provider");
        let request = SearchRequest { top_k: Some(0), ..Default::default() };
        let result = search(
            &db,
            &embedder,
            "anything",
            request,
            &RetrievalConfig::from_app_config(&test_config()),
        )
        .await;
        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
    }
}

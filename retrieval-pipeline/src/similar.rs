use common::error::CoreError;
use common::storage::db::SurrealDbClient;
use common::storage::filter::CompiledFilter;
use common::storage::types::test_doc::TestDoc;
use tracing::instrument;

use crate::pipeline::{run_with_embedding, RetrievalConfig, SearchOutcome, SearchScope};

/// Identify the reference test either by its `uid` or its `external_key`;
/// exactly one must be supplied.
#[derive(Debug, Clone)]
pub enum Reference {
    Uid(String),
    ExternalKey(String),
}

/// "Find similar to test X": reuse `X`'s stored doc vector as the query
/// vector and run the same fan-out/fusion/hydrate algorithm as [`crate::pipeline::search`],
/// excluding `X` itself from the results.
#[instrument(skip(db, config))]
pub async fn find_similar(
    db: &SurrealDbClient,
    reference: Reference,
    top_k: usize,
    scope: SearchScope,
    config: &RetrievalConfig,
) -> Result<SearchOutcome, CoreError> {
    let reference_doc = match reference {
        Reference::Uid(uid) => TestDoc::fetch_by_uid(db, &uid)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("no test with uid '{uid}'")))?,
        Reference::ExternalKey(key) => {
            let mut matches = TestDoc::fetch_by_external_key(db, &key).await?;
            match matches.len() {
                0 => return Err(CoreError::NotFound(format!("no test with external_key '{key}'"))),
                1 => matches.remove(0),
                n => {
                    return Err(CoreError::Conflict(format!(
                        "external_key '{key}' is ambiguous: matches {n} tests"
                    )))
                }
            }
        }
    };

    run_with_embedding(
        db,
        &reference_doc.embedding,
        scope,
        top_k,
        &CompiledFilter::matches_everything(),
        config,
        Some(reference_doc.uid()),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::indexes::ensure_runtime_indexes;
    use common::storage::types::test_doc::Priority;
    use uuid::Uuid;

    async fn test_db(dim: usize) -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("similar_test", &database).await.expect("memory db");
        db.apply_migrations().await.expect("migrations");
        ensure_runtime_indexes(&db, dim).await.expect("indexes");
        db
    }

    fn doc(uid: &str, external_key: Option<&str>, title: &str, embedding: Vec<f32>) -> TestDoc {
        TestDoc::new(
            uid.to_string(),
            external_key.map(str::to_string),
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

    #[tokio::test]
    async fn excludes_reference_test_from_results() {
        let db = test_db(4).await;
        db.store_item(doc("a", None, "login", vec![1.0, 0.0, 0.0, 0.0])).await.expect("store a");
        db.store_item(doc("b", None, "login variant", vec![0.9, 0.1, 0.0, 0.0]))
            .await
            .expect("store b");

        let outcome = find_similar(
            &db,
            Reference::Uid("a".to_string()),
            10,
            SearchScope::Docs,
            &RetrievalConfig::default(),
        )
        .await
        .expect("find_similar");

        assert!(outcome.hits.iter().all(|hit| hit.doc.uid() != "a"));
        assert!(outcome.hits.iter().any(|hit| hit.doc.uid() == "b"));
    }

    #[tokio::test]
    async fn unknown_uid_is_not_found() {
        let db = test_db(4).await;
        let result = find_similar(
            &db,
            Reference::Uid("missing".to_string()),
            10,
            SearchScope::Docs,
            &RetrievalConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn ambiguous_external_key_is_a_conflict() {
        let db = test_db(4).await;
        db.store_item(doc("a", Some("DUP-1"), "one", vec![1.0, 0.0, 0.0, 0.0]))
            .await
            .expect("store a");
        db.store_item(doc("b", Some("DUP-1"), "two", vec![0.0, 1.0, 0.0, 0.0]))
            .await
            .expect("store b");

        let result = find_similar(
            &db,
            Reference::ExternalKey("DUP-1".to_string()),
            10,
            SearchScope::Docs,
            &RetrievalConfig::default(),
        )
        .await;
        assert!(matches!(result, Err(CoreError::Conflict(_))));
    }
}

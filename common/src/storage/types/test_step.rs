use crate::storage::db::SurrealDbClient;
use crate::storage::filter::CompiledFilter;
use crate::storage::types::test_doc::Priority;
use crate::{error::CoreError, stored_object};

stored_object!(TestStep, "test_step", {
    parent_uid: String,
    index: u32,
    action: String,
    data: Option<String>,
    expected: Vec<String>,
    embedding: Vec<f32>,
    // Denormalised copies of the parent doc's filterable fields, so C5 filters
    // compile identically against either tier.
    tags: Vec<String>,
    platforms: Vec<String>,
    priority: Option<Priority>,
    test_type: Option<String>,
    folder_path: Vec<String>,
    related_keys: Vec<String>,
    external_key: Option<String>
});

/// One ranked hit from [`TestStep::vector_search`].
#[derive(Debug, Clone)]
pub struct StepHit {
    pub parent_uid: String,
    pub index: u32,
    pub score: f32,
}

impl TestStep {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent_uid: String,
        index: u32,
        action: String,
        data: Option<String>,
        expected: Vec<String>,
        embedding: Vec<f32>,
        tags: Vec<String>,
        platforms: Vec<String>,
        priority: Option<Priority>,
        test_type: Option<String>,
        folder_path: Vec<String>,
        related_keys: Vec<String>,
        external_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("{parent_uid}:{index}"),
            created_at: now,
            updated_at: now,
            parent_uid,
            index,
            action,
            data,
            expected,
            embedding,
            tags,
            platforms,
            priority,
            test_type,
            folder_path,
            related_keys,
            external_key,
        }
    }

    /// `DeleteStepsByParent(uid)`. Safe if absent.
    pub async fn delete_by_parent(db: &SurrealDbClient, parent_uid: &str) -> Result<u64, CoreError> {
        let sql = format!("DELETE {table} WHERE parent_uid = $parent_uid RETURN BEFORE;", table = Self::table_name());
        let mut response = db
            .client
            .query(sql)
            .bind(("parent_uid", parent_uid.to_string()))
            .await
            .map_err(CoreError::from)?;
        let deleted: Vec<TestStep> = response.take(0).map_err(CoreError::from)?;
        Ok(deleted.len() as u64)
    }

    /// `FetchStepsByParent(uid)`, ordered by step index.
    pub async fn fetch_by_parent(db: &SurrealDbClient, parent_uid: &str) -> Result<Vec<TestStep>, CoreError> {
        let sql = format!(
            "SELECT * FROM {table} WHERE parent_uid = $parent_uid ORDER BY index ASC;",
            table = Self::table_name(),
        );
        let mut response = db
            .client
            .query(sql)
            .bind(("parent_uid", parent_uid.to_string()))
            .await
            .map_err(CoreError::from)?;
        response.take(0).map_err(CoreError::from)
    }

    /// `KnnSteps(vec, k, filter)`.
    pub async fn vector_search(
        db: &SurrealDbClient,
        query_embedding: &[f32],
        k: usize,
        ef: usize,
        filter: &CompiledFilter,
    ) -> Result<Vec<StepHit>, CoreError> {
        let predicate = filter.where_fragment();
        let knn_clause = if predicate.is_empty() {
            format!("embedding <|{k},{ef}|> $embedding")
        } else {
            format!("{} AND embedding <|{k},{ef}|> $embedding", predicate.trim_start_matches(" WHERE "))
        };

        let sql = format!(
            "SELECT parent_uid, index, vector::similarity::cosine(embedding, $embedding) AS score \
             FROM {table} WHERE {knn_clause} ORDER BY score DESC LIMIT {k};",
            table = Self::table_name(),
        );

        #[derive(serde::Deserialize)]
        struct Row {
            parent_uid: String,
            index: u32,
            score: f32,
        }

        let mut query = db.client.query(sql).bind(("embedding", query_embedding.to_vec()));
        for (name, value) in filter.bindings() {
            query = query.bind((name.clone(), value.clone()));
        }

        let mut response = query.await.map_err(CoreError::from)?;
        let rows: Vec<Row> = response.take(0).map_err(CoreError::from)?;

        Ok(rows
            .into_iter()
            .map(|r| StepHit { parent_uid: r.parent_uid, index: r.index, score: r.score })
            .collect())
    }

    pub async fn count(db: &SurrealDbClient) -> Result<u64, CoreError> {
        #[derive(serde::Deserialize)]
        struct CountRow {
            count: u64,
        }
        let sql = format!("SELECT count() AS count FROM {} GROUP ALL;", Self::table_name());
        let mut response = db.client.query(sql).await.map_err(CoreError::from)?;
        let rows: Vec<CountRow> = response.take(0).map_err(CoreError::from)?;
        Ok(rows.first().map_or(0, |r| r.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup_test_db(dim: usize) -> SurrealDbClient {
        let namespace = "test_step_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory db");
        db.apply_migrations().await.expect("migrations");
        crate::storage::indexes::ensure_runtime_indexes(&db, dim)
            .await
            .expect("indexes");
        db
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
    async fn delete_by_parent_removes_all_steps() {
        let db = setup_test_db(3).await;
        db.store_item(step("a", 0, "enter username", vec![1.0, 0.0, 0.0]))
            .await
            .expect("store");
        db.store_item(step("a", 1, "click submit", vec![0.0, 1.0, 0.0]))
            .await
            .expect("store");

        let deleted = TestStep::delete_by_parent(&db, "a").await.expect("delete");
        assert_eq!(deleted, 2);

        let remaining = TestStep::fetch_by_parent(&db, "a").await.expect("fetch");
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn fetch_by_parent_is_ordered_by_index() {
        let db = setup_test_db(3).await;
        db.store_item(step("a", 1, "second", vec![0.0, 1.0, 0.0])).await.expect("store");
        db.store_item(step("a", 0, "first", vec![1.0, 0.0, 0.0])).await.expect("store");

        let steps = TestStep::fetch_by_parent(&db, "a").await.expect("fetch");
        assert_eq!(steps.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 1]);
    }
}

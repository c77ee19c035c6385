use crate::storage::db::SurrealDbClient;
use crate::storage::filter::CompiledFilter;
use crate::{error::CoreError, stored_object};

/// Priority as carried on the canonical test document. Unrecognised
/// source values are preserved as `test_type`-style free text upstream in the
/// normaliser rather than rejected here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

stored_object!(TestDoc, "test_doc", {
    /// Tracker issue key or similar; null when the source has none.
    external_key: Option<String>,
    title: String,
    description: Option<String>,
    priority: Option<Priority>,
    test_type: Option<String>,
    platforms: Vec<String>,
    tags: Vec<String>,
    folder_path: Vec<String>,
    related_keys: Vec<String>,
    source: String,
    ingested_at: DateTime<Utc>,
    embedding: Vec<f32>
});

/// One ranked hit from [`TestDoc::vector_search`]: the row and its cosine similarity.
#[derive(Debug, Clone)]
pub struct DocHit {
    pub doc: TestDoc,
    pub score: f32,
}

impl TestDoc {
    pub fn new(
        uid: String,
        external_key: Option<String>,
        title: String,
        description: Option<String>,
        priority: Option<Priority>,
        test_type: Option<String>,
        platforms: Vec<String>,
        tags: Vec<String>,
        folder_path: Vec<String>,
        related_keys: Vec<String>,
        source: String,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uid,
            created_at: now,
            updated_at: now,
            external_key,
            title,
            description,
            priority,
            test_type,
            platforms,
            tags,
            folder_path,
            related_keys,
            source,
            ingested_at: now,
            embedding,
        }
    }

    pub fn uid(&self) -> &str {
        &self.id
    }

    /// `DeleteDocByUid`: remove the doc row. Safe to call when absent.
    pub async fn delete_by_uid(db: &SurrealDbClient, uid: &str) -> Result<u64, CoreError> {
        let deleted: Option<TestDoc> = db
            .client
            .delete((Self::table_name(), uid))
            .await
            .map_err(CoreError::from)?;
        Ok(u64::from(deleted.is_some()))
    }

    /// `FetchDocByUid`.
    pub async fn fetch_by_uid(db: &SurrealDbClient, uid: &str) -> Result<Option<TestDoc>, CoreError> {
        db.client
            .select((Self::table_name(), uid))
            .await
            .map_err(CoreError::from)
    }

    /// `KnnDocs(vec, k, filter)`: approximate nearest neighbours over the doc
    /// tier, scored with cosine similarity, with C5's compiled predicate
    /// pushed down into the `WHERE` clause alongside the HNSW operator.
    pub async fn vector_search(
        db: &SurrealDbClient,
        query_embedding: &[f32],
        k: usize,
        ef: usize,
        filter: &CompiledFilter,
    ) -> Result<Vec<DocHit>, CoreError> {
        let predicate = filter.where_fragment();
        let knn_clause = if predicate.is_empty() {
            format!("embedding <|{k},{ef}|> $embedding")
        } else {
            format!("{} AND embedding <|{k},{ef}|> $embedding", predicate.trim_start_matches(" WHERE "))
        };

        let sql = format!(
            "SELECT *, vector::similarity::cosine(embedding, $embedding) AS score \
             FROM {table} WHERE {knn_clause} ORDER BY score DESC LIMIT {k};",
            table = Self::table_name(),
        );

        #[derive(serde::Deserialize)]
        struct Row {
            #[serde(flatten)]
            doc: TestDoc,
            score: f32,
        }

        let mut query = db.client.query(sql).bind(("embedding", query_embedding.to_vec()));
        for (name, value) in filter.bindings() {
            query = query.bind((name.clone(), value.clone()));
        }

        let mut response = query.await.map_err(CoreError::from)?;
        let rows: Vec<Row> = response.take(0).map_err(CoreError::from)?;

        Ok(rows.into_iter().map(|r| DocHit { doc: r.doc, score: r.score }).collect())
    }

    /// `FetchDocByUid` for a `external_key` exact-match lookup (§4.6.3), bounded
    /// to 16 rows so a misconfigured source can never return an unbounded scan.
    pub async fn fetch_by_external_key(db: &SurrealDbClient, external_key: &str) -> Result<Vec<TestDoc>, CoreError> {
        let sql = format!(
            "SELECT * FROM {table} WHERE external_key = $external_key LIMIT 16;",
            table = Self::table_name(),
        );
        let mut response = db
            .client
            .query(sql)
            .bind(("external_key", external_key.to_string()))
            .await
            .map_err(CoreError::from)?;
        response.take(0).map_err(CoreError::from)
    }

    /// `Counts()` doc side.
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

use std::collections::HashMap;

use crate::storage::db::SurrealDbClient;
use crate::{error::CoreError, stored_object};

stored_object!(IngestCheckpoint, "ingest_checkpoint", {
    source_id: String,
    last_chunk_completed: u64,
    deferred_chunks: Vec<u64>,
    docs_in: u64,
    docs_written: u64,
    steps_written: u64,
    warnings: u64,
    errors: u64,
    started_at: DateTime<Utc>
});

impl IngestCheckpoint {
    pub fn new(source_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: source_id.clone(),
            created_at: now,
            updated_at: now,
            source_id,
            last_chunk_completed: 0,
            deferred_chunks: Vec::new(),
            docs_in: 0,
            docs_written: 0,
            steps_written: 0,
            warnings: 0,
            errors: 0,
            started_at: now,
        }
    }

    /// Load the checkpoint for `source_id`, or a fresh one if this is the first run.
    pub async fn load_or_new(db: &SurrealDbClient, source_id: &str) -> Result<Self, CoreError> {
        match db
            .client
            .select::<Option<Self>>((Self::table_name(), source_id))
            .await
            .map_err(CoreError::from)?
        {
            Some(existing) => Ok(existing),
            None => Ok(Self::new(source_id.to_string())),
        }
    }

    /// Persist the checkpoint with write-then-rename durability semantics,
    /// modelled on the single-writer `UPDATE ... MERGE` idiom used for the
    /// workspace's other durable singleton records. Surreal's own durability
    /// guarantee stands in for the checkpoint file's atomic rename.
    pub async fn persist(&self, db: &SurrealDbClient) -> Result<(), CoreError> {
        let mut fields: HashMap<&'static str, serde_json::Value> = HashMap::new();
        fields.insert("last_chunk_completed", serde_json::json!(self.last_chunk_completed));
        fields.insert("deferred_chunks", serde_json::json!(self.deferred_chunks));
        fields.insert("docs_in", serde_json::json!(self.docs_in));
        fields.insert("docs_written", serde_json::json!(self.docs_written));
        fields.insert("steps_written", serde_json::json!(self.steps_written));
        fields.insert("warnings", serde_json::json!(self.warnings));
        fields.insert("errors", serde_json::json!(self.errors));
        fields.insert("updated_at", serde_json::json!(Utc::now().to_rfc3339()));

        let sql = format!(
            "UPDATE type::thing($table, $id) MERGE $changes RETURN AFTER;",
        );

        db.client
            .query(sql)
            .bind(("table", Self::table_name()))
            .bind(("id", self.source_id.clone()))
            .bind(("changes", fields))
            .await
            .map_err(CoreError::from)?
            .check()
            .map_err(CoreError::from)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn load_or_new_creates_fresh_checkpoint() {
        let namespace = "checkpoint_ns";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database).await.expect("in-memory db");
        db.apply_migrations().await.expect("migrations");

        let checkpoint = IngestCheckpoint::load_or_new(&db, "source-a").await.expect("load");
        assert_eq!(checkpoint.last_chunk_completed, 0);
        assert!(checkpoint.deferred_chunks.is_empty());
    }

    #[tokio::test]
    async fn persist_then_reload_round_trips() {
        let namespace = "checkpoint_ns2";
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory(namespace, &database).await.expect("in-memory db");
        db.apply_migrations().await.expect("migrations");

        let mut checkpoint = IngestCheckpoint::new("source-a".to_string());
        db.store_item(checkpoint.clone()).await.expect("store");
        checkpoint.last_chunk_completed = 4;
        checkpoint.docs_written = 100;
        checkpoint.persist(&db).await.expect("persist");

        let reloaded = IngestCheckpoint::load_or_new(&db, "source-a").await.expect("reload");
        assert_eq!(reloaded.last_chunk_completed, 4);
        assert_eq!(reloaded.docs_written, 100);
    }
}

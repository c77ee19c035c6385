#![cfg(test)]

use std::sync::Arc;

use common::storage::db::SurrealDbClient;
use common::storage::indexes::ensure_runtime_indexes;
use common::storage::types::test_doc::{Priority, TestDoc};
use common::utils::config::{AppConfig, EmbedProviderKind};
use embedding_provider::EmbeddingProvider;
use uuid::Uuid;

use crate::api_state::ApiState;

pub(crate) const TEST_DIM: usize = 8;

pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        embed_provider: EmbedProviderKind::Hashed,
        embed_model: "test-model".to_string(),
        embed_dim: TEST_DIM,
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
        checkpoint_path: "./checkpoint".to_string(),
        search_timeout_secs: 10,
        ingest_chunk_timeout_secs: 60,
        shutdown_grace_secs: 1,
        http_port: 0,
        search_qps: 1000,
        ingest_qps: 1000,
    }
}

pub(crate) async fn test_state() -> ApiState {
    let database = Uuid::new_v4().to_string();
    let db = Arc::new(SurrealDbClient::memory("tool_surface_test", &database).await.expect("memory db"));
    db.apply_migrations().await.expect("migrations");
    ensure_runtime_indexes(&db, TEST_DIM).await.expect("indexes");

    let config = test_config();
    let embedder = Arc::new(EmbeddingProvider::from_config(&config).await.expect("embedder"));

    ApiState::new(db, embedder, &config)
}

pub(crate) fn test_doc(uid: &str, external_key: Option<&str>, title: &str, dim: usize) -> TestDoc {
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
        vec![0.0; dim],
    )
}

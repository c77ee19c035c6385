use std::sync::Arc;

use common::storage::db::SurrealDbClient;
use common::utils::config::AppConfig;
use embedding_provider::EmbeddingProvider;
use ingestion_pipeline::{IngestionConfig, IngestionPipeline};
use retrieval_pipeline::RetrievalConfig;

use crate::metrics::Metrics;
use crate::rate_limit::ToolLimiters;

/// Shared state threaded through every tool-surface handler: the store
/// connection, the embedding provider, per-component tuning, and the
/// operational core (counters, rate limiters).
#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub embedder: Arc<EmbeddingProvider>,
    pub retrieval: RetrievalConfig,
    pub ingestion: Arc<IngestionPipeline>,
    pub metrics: Arc<Metrics>,
    pub limiters: Arc<ToolLimiters>,
    pub version: &'static str,
}

impl ApiState {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<EmbeddingProvider>, config: &AppConfig) -> Self {
        let ingestion = Arc::new(IngestionPipeline::new(
            db.clone(),
            embedder.clone(),
            IngestionConfig::from_app_config(config),
        ));

        Self {
            db,
            embedder,
            retrieval: RetrievalConfig::from_app_config(config),
            ingestion,
            metrics: Arc::new(Metrics::default()),
            limiters: Arc::new(ToolLimiters::from_app_config(config)),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

use common::utils::config::AppConfig;

#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub chunk_size: usize,
    pub chunk_parallelism: usize,
    pub embed_batch_size: usize,
    pub embed_parallelism: usize,
    pub backpressure_restore_after: u32,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_parallelism: 3,
            embed_batch_size: 25,
            embed_parallelism: 4,
            backpressure_restore_after: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            tuning: IngestionTuning::default(),
        }
    }
}

impl IngestionConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: IngestionTuning {
                chunk_size: config.b_ingest,
                chunk_parallelism: config.p_ingest,
                embed_batch_size: config.b_embed,
                embed_parallelism: config.p_embed,
                ..IngestionTuning::default()
            },
        }
    }
}

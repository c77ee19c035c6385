use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedProviderKind {
    FastEmbed,
    OpenAi,
    Hashed,
}

fn default_embed_provider() -> EmbedProviderKind {
    EmbedProviderKind::Hashed
}

fn default_embed_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

fn default_embed_dim() -> usize {
    384
}

fn default_store_dsn() -> String {
    "mem://".to_string()
}

fn default_w_doc() -> f32 {
    0.7
}

fn default_w_step() -> f32 {
    0.3
}

fn default_overfetch() -> usize {
    3
}

fn default_b_ingest() -> usize {
    500
}

fn default_p_ingest() -> usize {
    3
}

fn default_b_embed() -> usize {
    25
}

fn default_p_embed() -> usize {
    4
}

fn default_checkpoint_path() -> String {
    "./data/ingest_checkpoint".to_string()
}

fn default_search_timeout_secs() -> u64 {
    10
}

fn default_ingest_chunk_timeout_secs() -> u64 {
    60
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

fn default_http_port() -> u16 {
    8080
}

fn default_search_qps() -> u32 {
    60
}

fn default_ingest_qps() -> u32 {
    5
}

/// Recognised configuration options, layered the way the teacher's
/// `get_config` does: an optional `config.toml`, overridden by environment variables.
#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_embed_provider")]
    pub embed_provider: EmbedProviderKind,
    #[serde(default = "default_embed_model")]
    pub embed_model: String,
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,
    pub openai_api_key: Option<String>,
    #[serde(default = "default_store_dsn")]
    pub store_dsn: String,
    #[serde(default)]
    pub surrealdb_username: String,
    #[serde(default)]
    pub surrealdb_password: String,
    #[serde(default = "default_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_database")]
    pub surrealdb_database: String,
    #[serde(default = "default_w_doc")]
    pub w_doc: f32,
    #[serde(default = "default_w_step")]
    pub w_step: f32,
    #[serde(default = "default_overfetch")]
    pub overfetch: usize,
    #[serde(default = "default_b_ingest")]
    pub b_ingest: usize,
    #[serde(default = "default_p_ingest")]
    pub p_ingest: usize,
    #[serde(default = "default_b_embed")]
    pub b_embed: usize,
    #[serde(default = "default_p_embed")]
    pub p_embed: usize,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: String,
    #[serde(default = "default_search_timeout_secs")]
    pub search_timeout_secs: u64,
    #[serde(default = "default_ingest_chunk_timeout_secs")]
    pub ingest_chunk_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_search_qps")]
    pub search_qps: u32,
    #[serde(default = "default_ingest_qps")]
    pub ingest_qps: u32,
}

fn default_namespace() -> String {
    "testrecall".to_string()
}

fn default_database() -> String {
    "testrecall".to_string()
}

impl AppConfig {
    /// Fusion weights must be non-negative and sum to 1.
    pub fn validate(&self) -> Result<(), String> {
        if self.w_doc < 0.0 || self.w_step < 0.0 {
            return Err("W_DOC and W_STEP must be non-negative".to_string());
        }
        if (self.w_doc + self.w_step - 1.0).abs() > 1e-6 {
            return Err("W_DOC + W_STEP must sum to 1".to_string());
        }
        Ok(())
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

mod batching;
pub mod counters;
pub mod retry;

use std::str::FromStr;
use std::sync::Arc;

use async_openai::types::CreateEmbeddingRequestArgs;
use async_openai::{config::OpenAIConfig, Client};
use common::error::CoreError;
use common::utils::config::{AppConfig, EmbedProviderKind};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::counters::{Counters, CountersSnapshot};
use crate::retry::{classify_openai_error, with_retry, FailureClass};

const MAX_RETRY_ATTEMPTS: usize = 3;

/// A single capability for turning text into fixed-dimension vectors.
/// One of three variants of a tagged enum, never a trait object — the
/// core never branches on provider type outside this crate.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: Inner,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider").finish_non_exhaustive()
    }
}

#[derive(Clone)]
enum Inner {
    Hashed {
        dimension: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: EmbeddingModel,
        dimension: usize,
    },
    OpenAi {
        client: Client<OpenAIConfig>,
        model: String,
        dimension: usize,
    },
}

impl EmbeddingProvider {
    /// Build the provider selected by `AppConfig::embed_provider`, asserting
    /// that the backend's reported dimension matches `EMBED_DIM` — a mismatch
    /// is a `FatalConfig` error.
    pub async fn from_config(config: &AppConfig) -> Result<Self, CoreError> {
        let inner = match config.embed_provider {
            EmbedProviderKind::Hashed => Inner::Hashed {
                dimension: config.embed_dim.max(1),
            },
            EmbedProviderKind::FastEmbed => {
                let model_name = EmbeddingModel::from_str(&config.embed_model)
                    .map_err(|err| CoreError::FatalConfig(format!("unknown fastembed model {}: {err}", config.embed_model)))?;

                let options = TextInitOptions::new(model_name.clone()).with_show_download_progress(true);
                let model_name_for_task = model_name.clone();

                let (model, dimension) = tokio::task::spawn_blocking(move || {
                    let model = TextEmbedding::try_new(options)
                        .map_err(|err| CoreError::FatalConfig(format!("initialising fastembed model: {err}")))?;
                    let info = EmbeddingModel::get_model_info(&model_name_for_task)
                        .ok_or_else(|| CoreError::FatalConfig("fastembed model metadata missing".to_string()))?;
                    Ok::<_, CoreError>((model, info.dim))
                })
                .await
                .map_err(CoreError::from)??;

                Inner::FastEmbed {
                    model: Arc::new(Mutex::new(model)),
                    model_name,
                    dimension,
                }
            }
            EmbedProviderKind::OpenAi => {
                let api_key = config
                    .openai_api_key
                    .clone()
                    .ok_or_else(|| CoreError::FatalConfig("EMBED_PROVIDER=openai requires an API key".to_string()))?;
                let client = Client::with_config(OpenAIConfig::new().with_api_key(api_key));
                Inner::OpenAi {
                    client,
                    model: config.embed_model.clone(),
                    dimension: config.embed_dim,
                }
            }
        };

        let provider = EmbeddingProvider {
            inner,
            counters: Arc::new(Counters::default()),
        };

        if provider.dimension() != config.embed_dim && !matches!(provider.inner, Inner::Hashed { .. }) {
            return Err(CoreError::FatalConfig(format!(
                "embedding provider reports dimension {} but EMBED_DIM is {}",
                provider.dimension(),
                config.embed_dim
            )));
        }

        Ok(provider)
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            Inner::Hashed { .. } => "hashed",
            Inner::FastEmbed { .. } => "fastembed",
            Inner::OpenAi { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            Inner::Hashed { dimension } => *dimension,
            Inner::FastEmbed { dimension, .. } => *dimension,
            Inner::OpenAi { dimension, .. } => *dimension,
        }
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    /// `Embed(texts) -> vectors`, order-preserving, batched by `b_embed` with
    /// up to `p_embed` batches dispatched concurrently.
    pub async fn embed(&self, texts: &[String], b_embed: usize, p_embed: usize) -> Result<Vec<Vec<f32>>, CoreError> {
        let provider = self.clone();
        batching::batched_embed(texts, b_embed, p_embed, move |batch| {
            let provider = provider.clone();
            async move { provider.embed_batch_with_retry(batch).await }
        })
        .await
    }

    async fn embed_batch_with_retry(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>, CoreError> {
        self.counters.record_request();
        let result = with_retry(MAX_RETRY_ATTEMPTS, || {
            let batch = batch.clone();
            async move { self.embed_batch_once(batch).await }
        })
        .await;

        if let Err(err) = &result {
            self.counters.record_failure(retry::classify_core_error(err).label());
        }

        result
    }

    async fn embed_batch_once(&self, batch: Vec<String>) -> Result<Vec<Vec<f32>>, CoreError> {
        match &self.inner {
            Inner::Hashed { dimension } => Ok(batch.iter().map(|text| hashed_embedding(text, *dimension)).collect()),
            Inner::FastEmbed { model, .. } => {
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                let mut guard = model.lock().await;
                guard
                    .embed(batch, None)
                    .map_err(|err| CoreError::Transient(format!("fastembed batch failed: {err}")))
            }
            Inner::OpenAi { client, model, dimension } => {
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model)
                    .dimensions(*dimension as u32)
                    .input(batch.clone())
                    .build()
                    .map_err(|err| CoreError::InvalidInput(err.to_string()))?;

                let response = client.embeddings().create(request).await.map_err(|err| match classify_openai_error(&err) {
                    FailureClass::FatalConfig => CoreError::FatalConfig(err.to_string()),
                    FailureClass::InputError => CoreError::InvalidInput(err.to_string()),
                    FailureClass::Transient => CoreError::Transient(err.to_string()),
                })?;

                self.counters.record_tokens(u64::from(response.usage.total_tokens));

                let mut by_index: Vec<Option<Vec<f32>>> = vec![None; batch.len()];
                for item in response.data {
                    if let Some(slot) = by_index.get_mut(item.index as usize) {
                        *slot = Some(item.embedding);
                    }
                }

                by_index
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| v.ok_or_else(|| CoreError::Internal(format!("missing embedding at batch index {i}"))))
                    .collect()
            }
        }
    }
}

/// Deterministic bag-of-tokens hash embedding: zero-dependency fallback used
/// in tests and wherever no model weights or network access are available.
/// Empty input yields the well-defined zero vector.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        let idx = bucket(&token, dim);
        vector[idx] += 1.0;
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    debug!(tokens = token_count, dimension = dim, "computed hashed embedding");
    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[0..8]);
    (u64::from_le_bytes(bytes) as usize) % dimension
}

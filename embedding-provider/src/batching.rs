use common::error::CoreError;
use futures::stream::{self, StreamExt};

/// Split `texts` into batches of `batch_size`, dispatch up to `parallelism`
/// batches in flight concurrently, and reassemble the per-batch vectors back
/// into input order.
pub async fn batched_embed<F, Fut>(
    texts: &[String],
    batch_size: usize,
    parallelism: usize,
    embed_batch: F,
) -> Result<Vec<Vec<f32>>, CoreError>
where
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Vec<Vec<f32>>, CoreError>> + Send,
{
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let batch_size = batch_size.max(1);
    let chunks: Vec<Vec<String>> = texts.chunks(batch_size).map(<[String]>::to_vec).collect();

    let results: Vec<Result<Vec<Vec<f32>>, CoreError>> = stream::iter(chunks.into_iter().map(&embed_batch))
        .buffered(parallelism.max(1))
        .collect()
        .await;

    let mut out = Vec::with_capacity(texts.len());
    for batch_result in results {
        out.extend(batch_result?);
    }

    Ok(out)
}

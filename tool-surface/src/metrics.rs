use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use common::error::CoreError;
use common::storage::db::SurrealDbClient;
use common::storage::types::test_doc::TestDoc;
use common::storage::types::test_step::TestStep;
use dashmap::DashMap;
use embedding_provider::EmbeddingProvider;
use serde::Serialize;

/// Per-tool request counters and latency totals, and the timestamp of the
/// last successful embedding call, in the same atomics-behind-`Arc` shape as
/// `embedding_provider::counters::Counters`.
#[derive(Default)]
pub struct Metrics {
    requests: DashMap<&'static str, AtomicU64>,
    errors: DashMap<&'static str, AtomicU64>,
    latency_total_micros: DashMap<&'static str, AtomicU64>,
    last_successful_embed_at: AtomicI64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub tool: String,
    pub requests: u64,
    pub errors: u64,
    pub mean_latency_micros: u64,
}

/// §4.8's health snapshot: `{ store_reachable, doc_count, step_count,
/// embed_provider_ok, last_successful_embed_at, version }`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub store_reachable: bool,
    pub doc_count: u64,
    pub step_count: u64,
    pub embed_provider_ok: bool,
    pub last_successful_embed_at: Option<i64>,
    pub version: String,
}

impl Metrics {
    pub fn record_request(&self, tool: &'static str, elapsed_micros: u64, failed: bool) {
        self.requests.entry(tool).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed);
        self.latency_total_micros
            .entry(tool)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(elapsed_micros, Ordering::Relaxed);
        if failed {
            self.errors.entry(tool).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_successful_embed(&self, at_unix_secs: i64) {
        self.last_successful_embed_at.store(at_unix_secs, Ordering::Relaxed);
    }

    pub fn last_successful_embed_at(&self) -> Option<i64> {
        match self.last_successful_embed_at.load(Ordering::Relaxed) {
            0 => None,
            secs => Some(secs),
        }
    }

    pub fn snapshot(&self) -> Vec<OperationStats> {
        self.requests
            .iter()
            .map(|entry| {
                let tool = *entry.key();
                let requests = entry.value().load(Ordering::Relaxed);
                let errors = self.errors.get(tool).map_or(0, |e| e.load(Ordering::Relaxed));
                let total_micros = self.latency_total_micros.get(tool).map_or(0, |t| t.load(Ordering::Relaxed));
                let mean_latency_micros = if requests == 0 { 0 } else { total_micros / requests };
                OperationStats { tool: tool.to_string(), requests, errors, mean_latency_micros }
            })
            .collect()
    }
}

/// `check_health`: ping the store, count both tiers, and report embed-provider
/// reachability alongside the recorded operational counters.
pub async fn check_health(db: &SurrealDbClient, embedder: &EmbeddingProvider, metrics: &Metrics, version: &str) -> HealthSnapshot {
    let store_reachable = db.client.query("RETURN true").await.is_ok();

    let (doc_count, step_count) = if store_reachable {
        let docs = TestDoc::count(db).await.unwrap_or(0);
        let steps = TestStep::count(db).await.unwrap_or(0);
        (docs, steps)
    } else {
        (0, 0)
    };

    let embed_provider_ok = check_embed_provider(embedder).await.is_ok();

    HealthSnapshot {
        store_reachable,
        doc_count,
        step_count,
        embed_provider_ok,
        last_successful_embed_at: metrics.last_successful_embed_at(),
        version: version.to_string(),
    }
}

async fn check_embed_provider(embedder: &EmbeddingProvider) -> Result<(), CoreError> {
    embedder.embed(&["health check".to_string()], 1, 1).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reports_mean_latency_per_tool() {
        let metrics = Metrics::default();
        metrics.record_request("search_tests", 100, false);
        metrics.record_request("search_tests", 300, true);

        let stats = metrics.snapshot();
        let entry = stats.iter().find(|s| s.tool == "search_tests").expect("entry present");
        assert_eq!(entry.requests, 2);
        assert_eq!(entry.errors, 1);
        assert_eq!(entry.mean_latency_micros, 200);
    }

    #[test]
    fn last_successful_embed_at_defaults_to_none() {
        let metrics = Metrics::default();
        assert_eq!(metrics.last_successful_embed_at(), None);
        metrics.record_successful_embed(1_700_000_000);
        assert_eq!(metrics.last_successful_embed_at(), Some(1_700_000_000));
    }
}

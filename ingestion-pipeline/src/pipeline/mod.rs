mod config;
mod state;

pub use config::{IngestionConfig, IngestionTuning};

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::error::CoreError;
use common::storage::db::SurrealDbClient;
use common::storage::types::checkpoint::IngestCheckpoint;
use common::storage::types::test_doc::TestDoc;
use common::storage::types::test_step::TestStep;
use dashmap::DashMap;
use embedding_provider::retry::with_retry;
use embedding_provider::EmbeddingProvider;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use state_machines::core::GuardError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use self::state::ready;
use crate::normalize;
use crate::report::IngestReport;

const DB_WRITE_ATTEMPTS: usize = 3;

/// Drives the full ingest contract: stream the caller's records in chunks,
/// normalise, embed, and upsert each chunk under a per-uid critical section,
/// checkpointing progress as it goes so a restart resumes rather than redoes.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    embedder: Arc<EmbeddingProvider>,
    config: IngestionConfig,
    uid_locks: DashMap<String, Arc<Mutex<()>>>,
}

enum ChunkOutcome {
    Completed(IngestReport),
    Deferred(IngestReport, CoreError),
    Fatal(CoreError),
}

impl IngestionPipeline {
    pub fn new(db: Arc<SurrealDbClient>, embedder: Arc<EmbeddingProvider>, config: IngestionConfig) -> Self {
        Self {
            db,
            embedder,
            config,
            uid_locks: DashMap::new(),
        }
    }

    fn lock_for(&self, uid: &str) -> Arc<Mutex<()>> {
        self.uid_locks.entry(uid.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// `Ingest(source_id, records)`. Chunks `records` into `B_ingest`-sized
    /// batches, skips chunks left over from an *unfinished* prior run for
    /// `source_id`, and retries deferred chunks once at the end of the run.
    /// A checkpoint from a run that finished cleanly is a resume cursor, not
    /// a permanent marker, so a deliberate re-ingest of the same source
    /// still reprocesses every chunk.
    pub async fn ingest(&self, source_id: &str, source_label: &str, records: Vec<Value>) -> Result<IngestReport, CoreError> {
        let mut checkpoint = IngestCheckpoint::load_or_new(&self.db, source_id).await?;
        let chunk_size = self.config.tuning.chunk_size.max(1);
        let chunks: Vec<Vec<Value>> = records.chunks(chunk_size).map(<[Value]>::to_vec).collect();

        // A checkpoint only represents in-flight work to resume. If the prior
        // run for this source_id already finished (every chunk accounted for,
        // nothing deferred), this call is a deliberate fresh ingest rather
        // than a crash resume, so start the cursor over instead of skipping
        // every chunk.
        if !chunks.is_empty() && checkpoint.deferred_chunks.is_empty() && checkpoint.last_chunk_completed >= chunks.len() as u64 {
            checkpoint.last_chunk_completed = 0;
        }

        let mut completed: BTreeSet<u64> = (0..checkpoint.last_chunk_completed).collect();
        for deferred in &checkpoint.deferred_chunks {
            completed.remove(deferred);
        }

        let pending: Vec<u64> = (0..chunks.len() as u64).filter(|idx| !completed.contains(idx)).collect();
        info!(source_id, chunks = chunks.len(), pending = pending.len(), "starting ingestion run");

        let mut report = IngestReport::default();
        let throttled = AtomicBool::new(false);
        let consecutive_successes = AtomicU32::new(0);
        let parallelism = self.config.tuning.chunk_parallelism.max(1);

        let results: Vec<(u64, ChunkOutcome)> = stream::iter(pending.iter().copied().map(|idx| {
            let chunk = &chunks[idx as usize];
            let throttled = &throttled;
            async move {
                if throttled.load(Ordering::Relaxed) {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                (idx, self.process_chunk(idx, chunk, source_label).await)
            }
        }))
        .buffer_unordered(parallelism)
        .collect()
        .await;

        for (idx, outcome) in results {
            match outcome {
                ChunkOutcome::Completed(local) => {
                    report.merge(&local);
                    completed.insert(idx);
                    checkpoint.deferred_chunks.retain(|d| *d != idx);
                    let successes = consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
                    if successes >= self.config.tuning.backpressure_restore_after {
                        throttled.store(false, Ordering::Relaxed);
                    }
                }
                ChunkOutcome::Deferred(local, err) => {
                    report.merge(&local);
                    report.errors += 1;
                    if !checkpoint.deferred_chunks.contains(&idx) {
                        checkpoint.deferred_chunks.push(idx);
                    }
                    consecutive_successes.store(0, Ordering::Relaxed);
                    throttled.store(true, Ordering::Relaxed);
                    warn!(chunk = idx, error = %err, "chunk deferred after exhausting retries");
                }
                ChunkOutcome::Fatal(err) => {
                    sync_checkpoint_counters(&mut checkpoint, &completed, &report);
                    checkpoint.persist(&self.db).await?;
                    return Err(err);
                }
            }
        }

        sync_checkpoint_counters(&mut checkpoint, &completed, &report);
        checkpoint.persist(&self.db).await?;

        let retry_list = checkpoint.deferred_chunks.clone();
        if !retry_list.is_empty() {
            info!(count = retry_list.len(), "retrying deferred chunks at end of run");
        }
        for idx in retry_list {
            let chunk = &chunks[idx as usize];
            match self.process_chunk(idx, chunk, source_label).await {
                ChunkOutcome::Completed(local) => {
                    report.merge(&local);
                    completed.insert(idx);
                    checkpoint.deferred_chunks.retain(|d| *d != idx);
                }
                ChunkOutcome::Deferred(local, err) => {
                    report.merge(&local);
                    report.errors += 1;
                    warn!(chunk = idx, error = %err, "chunk still deferred after end-of-run retry");
                }
                ChunkOutcome::Fatal(err) => {
                    sync_checkpoint_counters(&mut checkpoint, &completed, &report);
                    checkpoint.persist(&self.db).await?;
                    return Err(err);
                }
            }
        }

        sync_checkpoint_counters(&mut checkpoint, &completed, &report);
        checkpoint.persist(&self.db).await?;

        info!(
            source_id,
            docs_written = report.docs_written,
            steps_written = report.steps_written,
            warnings = report.warnings,
            errors = report.errors,
            "ingestion run finished"
        );

        Ok(report)
    }

    async fn process_chunk(&self, chunk_index: u64, chunk: &[Value], source_label: &str) -> ChunkOutcome {
        let machine = ready();
        let mut local = IngestReport::default();
        local.docs_in = chunk.len() as u64;

        let mut docs = Vec::with_capacity(chunk.len());
        for raw in chunk {
            match normalize::normalise(raw, source_label) {
                Ok((doc, warnings)) => {
                    local.warnings += warnings.len() as u64;
                    for warning in &warnings {
                        debug!(chunk = chunk_index, field = %warning.field, message = %warning.message, "normalise warning");
                    }
                    docs.push(doc);
                }
                Err(err) => {
                    warn!(chunk = chunk_index, error = %err, "skipping unrecognisable record");
                    local.warnings += 1;
                }
            }
        }

        let machine = match machine.normalize() {
            Ok(m) => m,
            Err((_, guard)) => return ChunkOutcome::Fatal(map_guard_error("normalize", guard)),
        };

        if docs.is_empty() {
            return ChunkOutcome::Completed(local);
        }

        let mut doc_texts = Vec::with_capacity(docs.len());
        let mut step_back_pointers = Vec::new();
        let mut step_texts = Vec::new();
        for (doc_index, doc) in docs.iter().enumerate() {
            doc_texts.push(doc.embedding_text());
            for step in &doc.steps {
                step_back_pointers.push(doc_index);
                step_texts.push(step.embedding_text());
            }
        }

        let tuning = &self.config.tuning;
        let (doc_embeddings, step_embeddings) = match tokio::join!(
            self.embedder.embed(&doc_texts, tuning.embed_batch_size, tuning.embed_parallelism),
            self.embedder.embed(&step_texts, tuning.embed_batch_size, tuning.embed_parallelism),
        ) {
            (Ok(d), Ok(s)) => (d, s),
            (Err(err), _) | (_, Err(err)) if matches!(err, CoreError::FatalConfig(_)) => return ChunkOutcome::Fatal(err),
            (Err(err), _) | (_, Err(err)) => return ChunkOutcome::Deferred(local, err),
        };

        let machine = match machine.embed() {
            Ok(m) => m,
            Err((_, guard)) => return ChunkOutcome::Fatal(map_guard_error("embed", guard)),
        };

        let mut per_doc_step_embeddings: Vec<Vec<Vec<f32>>> = vec![Vec::new(); docs.len()];
        for (doc_index, embedding) in step_back_pointers.into_iter().zip(step_embeddings.into_iter()) {
            per_doc_step_embeddings[doc_index].push(embedding);
        }

        for (doc_index, doc) in docs.iter().enumerate() {
            let test_doc = TestDoc::new(
                doc.uid.clone(),
                doc.external_key.clone(),
                doc.title.clone(),
                doc.description.clone(),
                doc.priority,
                doc.test_type.clone(),
                doc.platforms.clone(),
                doc.tags.clone(),
                doc.folder_path.clone(),
                doc.related_keys.clone(),
                doc.source.clone(),
                doc_embeddings[doc_index].clone(),
            );
            let test_steps: Vec<TestStep> = doc
                .steps
                .iter()
                .zip(per_doc_step_embeddings[doc_index].iter())
                .map(|(step, embedding)| {
                    TestStep::new(
                        doc.uid.clone(),
                        step.index,
                        step.action.clone(),
                        step.data.clone(),
                        step.expected.clone(),
                        embedding.clone(),
                        doc.tags.clone(),
                        doc.platforms.clone(),
                        doc.priority,
                        doc.test_type.clone(),
                        doc.folder_path.clone(),
                        doc.related_keys.clone(),
                        doc.external_key.clone(),
                    )
                })
                .collect();

            let lock = self.lock_for(&doc.uid);
            let _guard = lock.lock().await;

            if let Err(err) = self.upsert_doc_and_steps(test_doc, test_steps).await {
                return ChunkOutcome::Deferred(local, err);
            }
            local.docs_written += 1;
            local.steps_written += doc.steps.len() as u64;
        }

        let machine = match machine.upsert() {
            Ok(m) => m,
            Err((_, guard)) => return ChunkOutcome::Fatal(map_guard_error("upsert", guard)),
        };
        if let Err((_, guard)) = machine.checkpoint() {
            return ChunkOutcome::Fatal(map_guard_error("checkpoint", guard));
        }

        ChunkOutcome::Completed(local)
    }

    /// Step 4 of the upsert contract: delete the doc's old steps, then
    /// upsert the doc, then upsert its new steps. A crash between the first
    /// and third calls leaves a valid doc with stale or missing steps, which
    /// a re-run of the same uid fully replaces.
    async fn upsert_doc_and_steps(&self, doc: TestDoc, steps: Vec<TestStep>) -> Result<(), CoreError> {
        let uid = doc.uid().to_string();
        with_retry(DB_WRITE_ATTEMPTS, || {
            let db = &self.db;
            let uid = uid.clone();
            async move { TestStep::delete_by_parent(db, &uid).await.map(|_| ()) }
        })
        .await?;

        with_retry(DB_WRITE_ATTEMPTS, || {
            let db = &self.db;
            let doc = doc.clone();
            async move { db.upsert_item(doc).await.map_err(CoreError::from).map(|_| ()) }
        })
        .await?;

        for step in steps {
            with_retry(DB_WRITE_ATTEMPTS, || {
                let db = &self.db;
                let step = step.clone();
                async move { db.upsert_item(step).await.map_err(CoreError::from).map(|_| ()) }
            })
            .await?;
        }

        Ok(())
    }
}

fn sync_checkpoint_counters(checkpoint: &mut IngestCheckpoint, completed: &BTreeSet<u64>, report: &IngestReport) {
    checkpoint.last_chunk_completed = contiguous_prefix_len(completed);
    checkpoint.docs_in = report.docs_in;
    checkpoint.docs_written = report.docs_written;
    checkpoint.steps_written = report.steps_written;
    checkpoint.warnings = report.warnings;
    checkpoint.errors = report.errors;
}

fn contiguous_prefix_len(completed: &BTreeSet<u64>) -> u64 {
    let mut n = 0u64;
    while completed.contains(&n) {
        n += 1;
    }
    n
}

fn map_guard_error(stage: &'static str, err: GuardError) -> CoreError {
    CoreError::Internal(format!("ingestion state machine guard '{stage}' failed: guard={}, event={}, kind={:?}", err.guard, err.event, err.kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::config::{AppConfig, EmbedProviderKind};
    use serde_json::json;
    use uuid::Uuid;

    fn test_config() -> AppConfig {
        AppConfig {
            embed_provider: EmbedProviderKind::Hashed,
            embed_model: "test".to_string(),
            embed_dim: 8,
            openai_api_key: None,
            store_dsn: "mem://".to_string(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: "ns".to_string(),
            surrealdb_database: "db".to_string(),
            w_doc: 0.7,
            w_step: 0.3,
            overfetch: 3,
            b_ingest: 2,
            p_ingest: 2,
            b_embed: 25,
            p_embed: 4,
            checkpoint_path: "./checkpoint".to_string(),
            search_timeout_secs: 10,
            ingest_chunk_timeout_secs: 60,
            shutdown_grace_secs: 30,
            http_port: 8080,
            search_qps: 60,
            ingest_qps: 5,
        }
    }

    async fn test_pipeline() -> (IngestionPipeline, Arc<SurrealDbClient>) {
        let db = Arc::new(SurrealDbClient::memory("ingest_ns", &Uuid::new_v4().to_string()).await.expect("memory db"));
        db.apply_migrations().await.expect("migrations");
        let config = test_config();
        common::storage::indexes::ensure_runtime_indexes(&db, config.embed_dim).await.expect("indexes");
        let embedder = Arc::new(EmbeddingProvider::from_config(&config).await.expect("provider"));
        let pipeline = IngestionPipeline::new(Arc::clone(&db), embedder, IngestionConfig::from_app_config(&config));
        (pipeline, db)
    }

    #[tokio::test]
    async fn ingests_generic_records_into_doc_and_step_tables() {
        let (pipeline, db) = test_pipeline().await;
        let records = vec![json!({
            "external_key": "ABC-1",
            "title": "Login succeeds with valid credentials",
            "steps": [
                {"action": "enter username", "expected": "field accepts text"},
                {"action": "click login", "expected": "dashboard loads"},
            ],
        })];

        let report = pipeline.ingest("suite-a", "generic", records).await.expect("ingest");
        assert_eq!(report.docs_written, 1);
        assert_eq!(report.steps_written, 2);

        let doc = TestDoc::fetch_by_uid(&db, "ABC-1").await.expect("fetch").expect("present");
        assert_eq!(doc.title, "Login succeeds with valid credentials");
        let steps = TestStep::fetch_by_parent(&db, "ABC-1").await.expect("fetch steps");
        assert_eq!(steps.len(), 2);
    }

    #[tokio::test]
    async fn reingesting_same_uid_replaces_steps_rather_than_accumulating() {
        let (pipeline, db) = test_pipeline().await;
        let first = vec![json!({"external_key": "ABC-2", "title": "t", "steps": [{"action": "a"}, {"action": "b"}]})];
        pipeline.ingest("suite-b", "generic", first).await.expect("first ingest");

        let second = vec![json!({"external_key": "ABC-2", "title": "t", "steps": [{"action": "only one now"}]})];
        pipeline.ingest("suite-b", "generic", second).await.expect("second ingest");

        let steps = TestStep::fetch_by_parent(&db, "ABC-2").await.expect("fetch steps");
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn reingesting_a_fully_completed_source_reprocesses_every_chunk() {
        let (pipeline, db) = test_pipeline().await;
        let records = vec![
            json!({"external_key": "R-1", "title": "one"}),
            json!({"external_key": "R-2", "title": "two"}),
        ];
        pipeline.ingest("suite-c", "generic", records.clone()).await.expect("first pass");

        let checkpoint = IngestCheckpoint::load_or_new(&db, "suite-c").await.expect("checkpoint");
        assert_eq!(checkpoint.last_chunk_completed, 1);
        assert!(checkpoint.deferred_chunks.is_empty());

        let report = pipeline.ingest("suite-c", "generic", records).await.expect("second pass");
        assert_eq!(report.docs_in, 2);
        assert_eq!(report.steps_written, 0);
    }

    #[tokio::test]
    async fn resumes_from_checkpoint_skipping_only_unfinished_chunks() {
        let (pipeline, db) = test_pipeline().await;
        // test_config() chunks 2 records at a time, so this is 2 chunks.
        let records = vec![
            json!({"external_key": "P-1", "title": "one"}),
            json!({"external_key": "P-2", "title": "two"}),
            json!({"external_key": "P-3", "title": "three"}),
            json!({"external_key": "P-4", "title": "four"}),
        ];

        let mut checkpoint = IngestCheckpoint::new("suite-e".to_string());
        checkpoint.last_chunk_completed = 1;
        db.store_item(checkpoint).await.expect("seed checkpoint");

        let report = pipeline.ingest("suite-e", "generic", records).await.expect("resumed pass");
        assert_eq!(report.docs_in, 2);
        assert_eq!(report.docs_written, 2);

        let skipped = TestDoc::fetch_by_uid(&db, "P-1").await.expect("fetch");
        assert!(skipped.is_none());
        let resumed = TestDoc::fetch_by_uid(&db, "P-3").await.expect("fetch").expect("present");
        assert_eq!(resumed.title, "three");
    }

    #[tokio::test]
    async fn invalid_records_are_skipped_and_counted_as_warnings() {
        let (pipeline, _db) = test_pipeline().await;
        let records = vec![json!({"no_title_here": true}), json!({"external_key": "OK-1", "title": "fine"})];
        let report = pipeline.ingest("suite-d", "generic", records).await.expect("ingest");
        assert_eq!(report.docs_written, 1);
        assert_eq!(report.warnings, 1);
    }
}

use std::sync::Arc;
use std::time::Duration;

use common::error::CoreError;
use common::storage::db::SurrealDbClient;
use common::storage::indexes::ensure_runtime_indexes;
use common::utils::config::get_config;
use embedding_provider::EmbeddingProvider;
use tool_surface::api_routes_v1;
use tool_surface::api_state::ApiState;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;
    config.validate().map_err(CoreError::FatalConfig)?;

    // Set up router state
    let db = Arc::new(
        SurrealDbClient::new(
            &config.store_dsn,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );

    // Ensure db is initialized
    db.apply_migrations().await?;

    // Create embedding provider based on config
    let embedder = Arc::new(EmbeddingProvider::from_config(&config).await?);
    info!(
        backend = embedder.backend_label(),
        dimension = embedder.dimension(),
        "embedding provider initialized"
    );

    ensure_runtime_indexes(&db, embedder.dimension()).await?;

    let api_state = ApiState::new(db, embedder, &config);

    // Create Axum router
    let app = api_routes_v1::<ApiState>().with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", config.http_port);
    let serve_address = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(serve_address).await?;

    let shutdown_grace = Duration::from_secs(config.shutdown_grace_secs);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_grace))
        .await
    {
        error!("server error: {e}");
    }

    Ok(())
}

/// Waits for SIGINT/SIGTERM, then returns so `axum::serve` starts draining
/// in-flight requests. The configured grace period is logged for operators;
/// axum itself has no built-in hard deadline, so callers that need one wrap
/// this binary with their own timeout (systemd's `TimeoutStopSec`, k8s'
/// `terminationGracePeriodSeconds`).
async fn shutdown_signal(grace: Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!(grace_secs = grace.as_secs(), "shutdown signal received, draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use common::utils::config::{AppConfig, EmbedProviderKind};
    use tower::ServiceExt;

    use super::*;

    fn smoke_test_config(namespace: &str, database: &str) -> AppConfig {
        AppConfig {
            embed_provider: EmbedProviderKind::Hashed,
            embed_model: "test-model".to_string(),
            embed_dim: 16,
            openai_api_key: None,
            store_dsn: "mem://".to_string(),
            surrealdb_username: String::new(),
            surrealdb_password: String::new(),
            surrealdb_namespace: namespace.to_string(),
            surrealdb_database: database.to_string(),
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
            search_qps: 60,
            ingest_qps: 5,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn smoke_startup_with_in_memory_surrealdb() {
        let namespace = "test_ns";
        let database = format!("test_db_{}", uuid::Uuid::new_v4());
        let config = smoke_test_config(namespace, &database);

        let db = Arc::new(SurrealDbClient::memory(namespace, &database).await.expect("in-memory surrealdb"));
        db.apply_migrations().await.expect("migrations");

        let embedder = Arc::new(EmbeddingProvider::from_config(&config).await.expect("embedding provider"));
        ensure_runtime_indexes(&db, embedder.dimension()).await.expect("indexes");

        let api_state = ApiState::new(db, embedder, &config);
        let app = api_routes_v1::<ApiState>().with_state(api_state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/live").body(Body::empty()).expect("request"))
            .await
            .expect("router response");
        assert_eq!(response.status(), StatusCode::OK);

        let ready_response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("ready response");
        assert_eq!(ready_response.status(), StatusCode::OK);
    }
}

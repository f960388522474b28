// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use witness_node::config::NodeConfig;
use witness_node::ingest::GroupCoordinator;
use witness_node::pipeline::{IngestPipeline, IngestSettings};
use witness_node::server::build_router;
use witness_node::shutdown::ShutdownOrchestrator;
use witness_node::sink::{retry_fixed, BatchSink, DeadLetterWriter, OpenSearchClient, RetryingSink};
use witness_node::source::KafkaCoordinator;
use witness_node::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = NodeConfig::from_env().context("invalid configuration")?;
    init_telemetry(cfg.log_format).context("failed to initialize telemetry")?;

    tracing::info!("Initializing Witness Node with config: {:?}", cfg);

    // Bind before consuming anything, so a startup failure never strands
    // acknowledged events in the buffer.
    let listener = TcpListener::bind(cfg.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind_addr))?;

    // Store: provision the index before consuming anything.
    let store = Arc::new(
        OpenSearchClient::new(&cfg.opensearch_url, &cfg.opensearch_index)
            .context("failed to build store client")?,
    );
    retry_fixed(cfg.provision_attempts, cfg.provision_backoff, || store.ensure_index())
        .await
        .context("failed to provision search index")?;

    let mut sink: Arc<dyn BatchSink> = store.clone();
    if cfg.flush_retry_attempts > 0 || cfg.dead_letter_path.is_some() {
        let mut retrying = RetryingSink::new(sink, cfg.flush_retry_attempts, cfg.flush_retry_backoff);
        if let Some(path) = &cfg.dead_letter_path {
            let writer = DeadLetterWriter::open(path).context("failed to open dead letter file")?;
            tracing::info!("Dead letter file at {:?}", path);
            retrying = retrying.with_dead_letter(writer);
        }
        sink = Arc::new(retrying);
    }

    // Ingestion. Nothing below may return early: every exit goes through the
    // shutdown orchestrator.
    let coordinator: Arc<dyn GroupCoordinator> =
        Arc::new(KafkaCoordinator::new(&cfg.kafka).context("failed to create consumer group")?);
    let pipeline = IngestPipeline::new(coordinator.clone(), sink.clone(), IngestSettings::from_config(&cfg));
    let ingest_cancel = CancellationToken::new();
    let ingest = pipeline.spawn(ingest_cancel.clone());

    // HTTP
    let app = build_router(store, cfg.auth_token.clone());
    tracing::info!("Listening on {}", cfg.bind_addr);

    let http_shutdown = CancellationToken::new();
    let server = {
        let stop = http_shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await
        })
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    let report = ShutdownOrchestrator::new(cfg.shutdown_grace, ingest_cancel, ingest, coordinator, sink)
        .with_server(http_shutdown, server)
        .run()
        .await;

    if !report.errors.is_empty() {
        anyhow::bail!("shutdown finished with {} error(s)", report.errors.len());
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::OnceLock;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const DEFAULT_FILTER: &str = "witness_node=info,witness_core=info,tower_http=info";

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry(format: LogFormat) -> Result<(), BuildError> {
    // 1. Logs
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
    );
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }

    // 2. Metrics (Prometheus)
    let handle = PrometheusBuilder::new().install_recorder()?;
    if PROM_HANDLE.set(handle).is_err() {
        tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
    }

    metrics::describe_counter!("witness_events_buffered_total", "Events decoded and appended to the buffer");
    metrics::describe_counter!("witness_events_dropped_total", "Messages dropped because they could not be decoded");
    metrics::describe_counter!("witness_messages_acked_total", "Messages acknowledged to the consumer group");
    metrics::describe_counter!("witness_flushes_total", "Non-empty buffer flushes, by reason");
    metrics::describe_counter!("witness_flushed_events_total", "Events written to the store");
    metrics::describe_counter!("witness_flush_failures_total", "Batch writes that failed");
    metrics::describe_histogram!("witness_flush_duration_seconds", "Time taken by one batch write");
    metrics::describe_counter!("witness_dead_lettered_events_total", "Events diverted to the dead letter file");
    metrics::describe_gauge!("witness_buffer_size", "Events currently buffered");

    metrics::gauge!("witness_node_up", 1.0);
    Ok(())
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}

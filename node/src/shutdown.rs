// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ordered shutdown.
//!
//! 1. Stop the HTTP server, bounded by the grace period
//! 2. Cancel ingestion
//! 3. Wait for ingestion to finish, final flush included (no timeout)
//! 4. Close the consumer group and the sink

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ingest::GroupCoordinator;
use crate::sink::BatchSink;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// HTTP server stopped within the grace period (true when there was none).
    pub http_drained: bool,
    /// Ingestion task joined cleanly.
    pub ingest_drained: bool,
    pub errors: Vec<String>,
}

struct HttpServer {
    shutdown: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

pub struct ShutdownOrchestrator {
    grace: Duration,
    http: Option<HttpServer>,
    ingest_cancel: CancellationToken,
    ingest: JoinHandle<()>,
    coordinator: Arc<dyn GroupCoordinator>,
    sink: Arc<dyn BatchSink>,
}

impl ShutdownOrchestrator {
    pub fn new(
        grace: Duration,
        ingest_cancel: CancellationToken,
        ingest: JoinHandle<()>,
        coordinator: Arc<dyn GroupCoordinator>,
        sink: Arc<dyn BatchSink>,
    ) -> Self {
        Self {
            grace,
            http: None,
            ingest_cancel,
            ingest,
            coordinator,
            sink,
        }
    }

    /// Register the HTTP server task; cancelling `shutdown` must start its
    /// graceful stop.
    pub fn with_server(mut self, shutdown: CancellationToken, task: JoinHandle<io::Result<()>>) -> Self {
        self.http = Some(HttpServer { shutdown, task });
        self
    }

    pub async fn run(self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        report.http_drained = match self.http {
            None => true,
            Some(mut http) => {
                tracing::info!(grace_secs = self.grace.as_secs(), "stopping HTTP server");
                http.shutdown.cancel();
                match tokio::time::timeout(self.grace, &mut http.task).await {
                    Ok(Ok(Ok(()))) => true,
                    Ok(Ok(Err(e))) => {
                        report.errors.push(format!("http server: {}", e));
                        false
                    }
                    Ok(Err(e)) => {
                        report.errors.push(format!("http server task: {}", e));
                        false
                    }
                    Err(_) => {
                        tracing::warn!("HTTP server did not stop within grace period, aborting");
                        http.task.abort();
                        report.errors.push("http server: grace period elapsed".to_string());
                        false
                    }
                }
            }
        };

        tracing::info!("cancelling ingestion");
        self.ingest_cancel.cancel();
        report.ingest_drained = match self.ingest.await {
            Ok(()) => true,
            Err(e) => {
                report.errors.push(format!("ingestion task: {}", e));
                false
            }
        };

        if let Err(e) = self.coordinator.close().await {
            report.errors.push(format!("consumer group close: {}", e));
        }
        if let Err(e) = self.sink.close().await {
            report.errors.push(format!("sink close: {}", e));
        }

        for error in &report.errors {
            tracing::error!(error = %error, "shutdown step failed");
        }
        tracing::info!(
            http_drained = report.http_drained,
            ingest_drained = report.ingest_drained,
            "shutdown complete"
        );
        report
    }
}

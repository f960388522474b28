// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Wiring of the ingestion side: buffer, flusher, consumer and group driver.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use witness_core::EventBuffer;

use crate::config::NodeConfig;
use crate::ingest::{run_group, EventConsumer, FlushTrigger, Flusher, GroupCoordinator};
use crate::sink::BatchSink;

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub topics: Vec<String>,
    pub buffer_capacity: usize,
    pub flush_interval: Duration,
}

impl IngestSettings {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            topics: vec![config.kafka.topic.clone()],
            buffer_capacity: config.buffer_capacity,
            flush_interval: config.flush_interval,
        }
    }
}

pub struct IngestPipeline {
    coordinator: Arc<dyn GroupCoordinator>,
    buffer: Arc<EventBuffer>,
    flusher: Arc<Flusher>,
    consumer: Arc<EventConsumer>,
    settings: IngestSettings,
}

impl IngestPipeline {
    pub fn new(
        coordinator: Arc<dyn GroupCoordinator>,
        sink: Arc<dyn BatchSink>,
        settings: IngestSettings,
    ) -> Self {
        let buffer = Arc::new(EventBuffer::new(settings.buffer_capacity));
        let flusher = Arc::new(Flusher::new(buffer.clone(), sink));
        let consumer = Arc::new(EventConsumer::new(flusher.clone()));
        Self {
            coordinator,
            buffer,
            flusher,
            consumer,
            settings,
        }
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    pub fn flusher(&self) -> &Arc<Flusher> {
        &self.flusher
    }

    pub fn consumer(&self) -> &Arc<EventConsumer> {
        &self.consumer
    }

    /// Start the group driver and the flush trigger.
    ///
    /// The returned handle completes only after both have stopped, which
    /// includes the final flush. Awaiting it is the shutdown drain.
    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let trigger = FlushTrigger::new(self.flusher.clone(), self.settings.flush_interval);
        let flush_task = tokio::spawn(trigger.run(cancel.clone()));

        let driver = tokio::spawn(run_group(
            self.coordinator.clone(),
            self.settings.topics.clone(),
            self.consumer.clone(),
            cancel,
        ));

        tracing::info!(
            topics = ?self.settings.topics,
            capacity = self.settings.buffer_capacity,
            interval_ms = self.settings.flush_interval.as_millis() as u64,
            "ingestion pipeline started"
        );

        tokio::spawn(async move {
            if let Err(e) = driver.await {
                tracing::error!(error = %e, "consumer group driver panicked");
            }
            if let Err(e) = flush_task.await {
                tracing::error!(error = %e, "flush trigger panicked");
            }
            tracing::info!("ingestion pipeline stopped");
        })
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use witness_node::pipeline::{IngestPipeline, IngestSettings};
use witness_node::sink::MemorySink;
use witness_node::source::MemoryCoordinator;

pub const TOPIC: &str = "audit-events";

pub fn event_json(id: &str) -> serde_json::Value {
    json!({
        "event_id": id,
        "timestamp": "2025-03-01T12:00:00Z",
        "status": "SUCCESS",
        "event_type": "user.login",
        "actor": {"id": "u-1", "type": "user", "name": "alice", "ip_address": "10.0.0.1"},
        "entity": {"id": "acct-9", "type": "account", "name": "main"},
        "context": {"source_service": "auth", "trace_id": "t-1", "request_id": "r-1"},
        "details": {"method": "password"}
    })
}

pub fn event_payload(id: &str) -> Vec<u8> {
    serde_json::to_vec(&event_json(id)).unwrap()
}

/// A running pipeline over an in-memory log and store.
pub struct Harness {
    pub coordinator: Arc<MemoryCoordinator>,
    pub sink: Arc<MemorySink>,
    pub pipeline: IngestPipeline,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl Harness {
    pub fn start(partitions: i32, capacity: usize, interval: Duration) -> Self {
        Self::start_with_sink(partitions, capacity, interval, Arc::new(MemorySink::new()))
    }

    pub fn start_with_sink(
        partitions: i32,
        capacity: usize,
        interval: Duration,
        sink: Arc<MemorySink>,
    ) -> Self {
        let coordinator = Arc::new(MemoryCoordinator::new(TOPIC, partitions));
        let pipeline = IngestPipeline::new(
            coordinator.clone(),
            sink.clone(),
            IngestSettings {
                topics: vec![TOPIC.to_string()],
                buffer_capacity: capacity,
                flush_interval: interval,
            },
        );
        let cancel = CancellationToken::new();
        let handle = pipeline.spawn(cancel.clone());
        Self {
            coordinator,
            sink,
            pipeline,
            cancel,
            handle,
        }
    }

    /// Cancel ingestion and wait for the drain to finish.
    pub async fn stop(self) -> Arc<MemorySink> {
        self.cancel.cancel();
        self.handle.await.unwrap();
        self.sink
    }
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

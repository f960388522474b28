// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Batch sinks and the query-side store interface.
//!
//! A [`BatchSink`] accepts a whole batch or rejects it as a whole; writes are
//! idempotent per `event_id`. An [`EventStore`] reads back from the same data.

pub mod dead_letter;
pub mod memory;
pub mod opensearch;
pub mod retry;

use async_trait::async_trait;
use thiserror::Error;
use witness_core::{AuditEvent, SearchPage, SearchQuery};

pub use dead_letter::{read_dead_letters, DeadLetterWriter};
pub use memory::MemorySink;
pub use opensearch::{OpenSearchClient, TransportRetry};
pub use retry::{retry_fixed, RetryingSink};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("store rejected {failed} of {total} documents")]
    Rejected { failed: usize, total: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dead letter file corrupted: {0}")]
    Corrupted(String),

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

/// Durable destination for flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Write every event in `events`. Success or failure covers the whole batch.
    async fn write_batch(&self, events: &[AuditEvent]) -> SinkResult<()>;

    /// Release resources. Called once, after the last flush.
    async fn close(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// Read side of the store the sink writes into.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> SinkResult<SearchPage>;
}

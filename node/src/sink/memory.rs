// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-process store.
//!
//! Documents are keyed by `event_id`, so a later write replaces an earlier one.
//! Every accepted batch is also recorded, which lets callers observe exactly
//! what the pipeline flushed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use witness_core::{AuditEvent, SearchPage, SearchQuery};

use super::{BatchSink, EventStore, SinkError, SinkResult};

#[derive(Default)]
struct Documents {
    by_id: HashMap<String, (u64, AuditEvent)>,
    next_seq: u64,
}

#[derive(Default)]
pub struct MemorySink {
    docs: Mutex<Documents>,
    batches: Mutex<Vec<Vec<AuditEvent>>>,
    write_calls: AtomicUsize,
    failures_left: AtomicUsize,
    latency: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every write, simulating a slow store.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Reject the next `count` writes with [`SinkError::Unavailable`].
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of `write_batch` calls, including rejected ones.
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Accepted batches in write order.
    pub fn batches(&self) -> Vec<Vec<AuditEvent>> {
        lock(&self.batches).clone()
    }

    /// Stored document count (after id de-duplication).
    pub fn len(&self) -> usize {
        lock(&self.docs).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, event_id: &str) -> Option<AuditEvent> {
        lock(&self.docs).by_id.get(event_id).map(|(_, e)| e.clone())
    }
}

#[async_trait]
impl BatchSink for MemorySink {
    async fn write_batch(&self, events: &[AuditEvent]) -> SinkResult<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SinkError::Unavailable("injected failure".to_string()));
        }

        {
            let mut docs = lock(&self.docs);
            for event in events {
                let seq = docs.next_seq;
                docs.next_seq += 1;
                docs.by_id.insert(event.event_id.clone(), (seq, event.clone()));
            }
        }
        lock(&self.batches).push(events.to_vec());
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemorySink {
    async fn search(&self, query: &SearchQuery) -> SinkResult<SearchPage> {
        let docs = lock(&self.docs);
        let mut hits: Vec<&(u64, AuditEvent)> = docs
            .by_id
            .values()
            .filter(|(_, e)| query.filter.matches(e))
            .collect();
        // Newest first; write order breaks ties.
        hits.sort_by(|(sa, a), (sb, b)| b.timestamp.cmp(&a.timestamp).then(sb.cmp(sa)));

        let total = hits.len() as u64;
        let events = hits
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|(_, e)| e.clone())
            .collect();
        Ok(SearchPage { events, total })
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

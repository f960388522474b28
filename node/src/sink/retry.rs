// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Bounded retry around a batch sink, with an optional dead letter fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use witness_core::AuditEvent;

use super::{BatchSink, DeadLetterWriter, SinkResult};

/// Run `op` up to `attempts` times (at least once), sleeping `backoff` between tries.
pub async fn retry_fixed<T, E, F, Fut>(attempts: u32, backoff: Duration, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                tracing::warn!(error = %e, attempts_left = attempts - attempt, "retrying after error");
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct RetryingSink {
    inner: Arc<dyn BatchSink>,
    extra_attempts: u32,
    backoff: Duration,
    dead_letter: Option<DeadLetterWriter>,
}

impl RetryingSink {
    pub fn new(inner: Arc<dyn BatchSink>, extra_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            extra_attempts,
            backoff,
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, writer: DeadLetterWriter) -> Self {
        self.dead_letter = Some(writer);
        self
    }
}

#[async_trait]
impl BatchSink for RetryingSink {
    async fn write_batch(&self, events: &[AuditEvent]) -> SinkResult<()> {
        let result = retry_fixed(self.extra_attempts + 1, self.backoff, || {
            self.inner.write_batch(events)
        })
        .await;

        let err = match result {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        let Some(dead_letter) = &self.dead_letter else {
            return Err(err);
        };

        match dead_letter.append(events) {
            Ok(()) => {
                tracing::warn!(
                    count = events.len(),
                    path = %dead_letter.path().display(),
                    error = %err,
                    "batch dead-lettered after retries"
                );
                metrics::counter!("witness_dead_lettered_events_total", events.len() as u64);
                Ok(())
            }
            Err(dl_err) => {
                tracing::error!(error = %dl_err, "dead letter write failed");
                Err(err)
            }
        }
    }

    async fn close(&self) -> SinkResult<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{read_dead_letters, MemorySink, SinkError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;
    use witness_core::event::{Actor, Entity, RequestContext};

    fn event(id: &str) -> AuditEvent {
        AuditEvent {
            event_id: id.to_string(),
            timestamp: "2025-03-01T12:00:00Z".parse().unwrap(),
            status: "SUCCESS".into(),
            event_type: "user.login".into(),
            actor: Actor::default(),
            entity: Entity::default(),
            context: RequestContext::default(),
            security: None,
            details: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_retry_fixed_gives_up() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry_fixed(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down".to_string()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fixed_recovers() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_fixed(5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("not yet".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let store = Arc::new(MemorySink::new());
        store.fail_next(2);
        let sink = RetryingSink::new(store.clone(), 2, Duration::from_millis(1));

        sink.write_batch(&[event("a")]).await.unwrap();
        assert_eq!(store.write_calls(), 3);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_without_dead_letter_errors() {
        let store = Arc::new(MemorySink::new());
        store.fail_next(10);
        let sink = RetryingSink::new(store.clone(), 1, Duration::from_millis(1));

        let err = sink.write_batch(&[event("a")]).await.unwrap_err();
        assert!(matches!(err, SinkError::Unavailable(_)));
        assert_eq!(store.write_calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_batch_goes_to_dead_letter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dlq.bin");
        let store = Arc::new(MemorySink::new());
        store.fail_next(10);
        let sink = RetryingSink::new(store.clone(), 1, Duration::from_millis(1))
            .with_dead_letter(DeadLetterWriter::open(&path).unwrap());

        sink.write_batch(&[event("a"), event("b")]).await.unwrap();

        assert!(store.is_empty());
        let batches = read_dead_letters(&path).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-memory consumer group over a partitioned log.
//!
//! Single member, every partition assigned. Each generation starts its claims
//! at the committed offset, so anything not acknowledged before a rebalance is
//! redelivered (at-least-once).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::ingest::{
    Claim, Generation, GroupCoordinator, GroupError, GroupHandler, GroupResult, GroupSession,
    SourceMessage,
};

const CLAIM_BUFFER: usize = 64;

#[derive(Default)]
struct Partition {
    messages: Vec<Vec<u8>>,
    committed: i64,
}

struct PartitionLog {
    topic: String,
    partitions: Mutex<Vec<Partition>>,
    appended: watch::Sender<u64>,
}

impl PartitionLog {
    fn read_from(&self, partition: i32, position: i64) -> Vec<SourceMessage> {
        let partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(log) = partitions.get(partition as usize) else {
            return Vec::new();
        };
        log.messages
            .iter()
            .enumerate()
            .skip(position.max(0) as usize)
            .map(|(offset, payload)| SourceMessage {
                topic: self.topic.clone(),
                partition,
                offset: offset as i64,
                payload: payload.clone(),
            })
            .collect()
    }

    fn commit(&self, partition: i32, next: i64) {
        let mut partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(log) = partitions.get_mut(partition as usize) {
            log.committed = log.committed.max(next);
        }
    }

    fn committed(&self, partition: i32) -> i64 {
        let partitions = self.partitions.lock().unwrap_or_else(PoisonError::into_inner);
        partitions
            .get(partition as usize)
            .map(|p| p.committed)
            .unwrap_or(0)
    }
}

struct MemorySession {
    generation: u64,
    token: CancellationToken,
    log: Arc<PartitionLog>,
}

impl GroupSession for MemorySession {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn mark_message(&self, message: &SourceMessage) {
        self.log.commit(message.partition, message.offset + 1);
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

pub struct MemoryCoordinator {
    log: Arc<PartitionLog>,
    partition_count: i32,
    generation: AtomicU64,
    rebalance: watch::Sender<u64>,
    closed: CancellationToken,
}

impl MemoryCoordinator {
    pub fn new(topic: &str, partitions: i32) -> Self {
        let partition_count = partitions.max(1);
        let (appended, _) = watch::channel(0);
        let (rebalance, _) = watch::channel(0);
        Self {
            log: Arc::new(PartitionLog {
                topic: topic.to_string(),
                partitions: Mutex::new((0..partition_count).map(|_| Partition::default()).collect()),
                appended,
            }),
            partition_count,
            generation: AtomicU64::new(0),
            rebalance,
            closed: CancellationToken::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.log.topic
    }

    /// Append a payload to `partition` and return its offset.
    pub fn publish(&self, partition: i32, payload: impl Into<Vec<u8>>) -> i64 {
        let offset = {
            let mut partitions = self.log.partitions.lock().unwrap_or_else(PoisonError::into_inner);
            let index = partition.rem_euclid(self.partition_count) as usize;
            let log = &mut partitions[index];
            log.messages.push(payload.into());
            log.messages.len() as i64 - 1
        };
        self.log.appended.send_modify(|n| *n += 1);
        offset
    }

    /// Next offset the group will read from `partition`.
    pub fn committed(&self, partition: i32) -> i64 {
        self.log.committed(partition)
    }

    /// Number of generations started so far.
    pub fn generations(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// End the current generation; the driver re-enters with a fresh one.
    pub fn rebalance(&self) {
        self.rebalance.send_modify(|n| *n += 1);
    }
}

#[async_trait]
impl GroupCoordinator for MemoryCoordinator {
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
        cancel: &CancellationToken,
    ) -> GroupResult<()> {
        if self.closed.is_cancelled() {
            return Err(GroupError::Closed);
        }
        if !topics.iter().any(|t| t == &self.log.topic) {
            return Err(GroupError::Session(format!(
                "no subscribed topic is served here (have {})",
                self.log.topic
            )));
        }

        let mut rebalance = self.rebalance.subscribe();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(MemorySession {
            generation,
            token: cancel.child_token(),
            log: self.log.clone(),
        });

        let mut claims = Vec::new();
        let mut feeders = Vec::new();
        for partition in 0..self.partition_count {
            let start = self.log.committed(partition);
            let (tx, rx) = mpsc::channel(CLAIM_BUFFER);
            claims.push(Claim::new(self.log.topic.clone(), partition, start, rx));
            feeders.push(tokio::spawn(feed(
                self.log.clone(),
                partition,
                start,
                tx,
                session.token.clone(),
            )));
        }

        let running = match Generation::start(handler, session.clone(), claims).await {
            Ok(running) => running,
            Err(e) => {
                session.token.cancel();
                return Err(e);
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.closed.cancelled() => {}
            _ = rebalance.changed() => {
                tracing::info!(generation, "rebalance requested");
            }
        }

        session.token.cancel();
        for feeder in feeders {
            let _ = feeder.await;
        }
        running.finish().await
    }

    async fn close(&self) -> GroupResult<()> {
        self.closed.cancel();
        tracing::info!(topic = %self.log.topic, "memory consumer group closed");
        Ok(())
    }
}

/// Push messages from `position` onward into a claim until the session ends.
async fn feed(
    log: Arc<PartitionLog>,
    partition: i32,
    mut position: i64,
    tx: mpsc::Sender<SourceMessage>,
    token: CancellationToken,
) {
    let mut appended = log.appended.subscribe();
    loop {
        let pending = log.read_from(partition, position);
        if pending.is_empty() {
            tokio::select! {
                _ = token.cancelled() => return,
                changed = appended.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            continue;
        }

        for message in pending {
            tokio::select! {
                _ = token.cancelled() => return,
                sent = tx.send(message) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
            position += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Records offsets and acknowledges everything.
    #[derive(Default)]
    struct AckAll {
        seen: Mutex<Vec<(i32, i64)>>,
        setups: AtomicU64,
        cleanups: AtomicU64,
    }

    #[async_trait]
    impl GroupHandler for AckAll {
        async fn setup(&self, _session: Arc<dyn GroupSession>) -> GroupResult<()> {
            self.setups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn cleanup(&self, _session: Arc<dyn GroupSession>) -> GroupResult<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn consume_claim(
            &self,
            session: Arc<dyn GroupSession>,
            mut claim: Claim,
        ) -> GroupResult<()> {
            loop {
                tokio::select! {
                    next = claim.next() => match next {
                        Some(message) => {
                            self.seen.lock().unwrap().push((message.partition, message.offset));
                            session.mark_message(&message);
                        }
                        None => return Ok(()),
                    },
                    _ = session.token().cancelled() => return Ok(()),
                }
            }
        }
    }

    async fn wait_for(handler: &AckAll, count: usize) {
        for _ in 0..200 {
            if handler.seen.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} messages");
    }

    #[tokio::test]
    async fn test_consume_delivers_and_commits() {
        let coordinator = Arc::new(MemoryCoordinator::new("audit-events", 2));
        coordinator.publish(0, b"a".to_vec());
        coordinator.publish(1, b"b".to_vec());
        coordinator.publish(0, b"c".to_vec());

        let handler = Arc::new(AckAll::default());
        let cancel = CancellationToken::new();
        let task = {
            let coordinator = coordinator.clone();
            let handler = handler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                coordinator
                    .consume(&["audit-events".to_string()], handler, &cancel)
                    .await
            })
        };

        wait_for(&handler, 3).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(coordinator.committed(0), 2);
        assert_eq!(coordinator.committed(1), 1);
        assert_eq!(handler.setups.load(Ordering::SeqCst), 1);
        assert_eq!(handler.cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rebalance_resumes_from_committed() {
        let coordinator = Arc::new(MemoryCoordinator::new("audit-events", 1));
        coordinator.publish(0, b"a".to_vec());

        let handler = Arc::new(AckAll::default());
        let cancel = CancellationToken::new();
        let topics = vec!["audit-events".to_string()];

        let first = {
            let (coordinator, handler, cancel, topics) =
                (coordinator.clone(), handler.clone(), cancel.clone(), topics.clone());
            tokio::spawn(async move { coordinator.consume(&topics, handler, &cancel).await })
        };
        wait_for(&handler, 1).await;
        coordinator.rebalance();
        first.await.unwrap().unwrap();

        coordinator.publish(0, b"b".to_vec());
        let second = {
            let (coordinator, handler, cancel) = (coordinator.clone(), handler.clone(), cancel.clone());
            tokio::spawn(async move { coordinator.consume(&topics, handler, &cancel).await })
        };
        wait_for(&handler, 2).await;
        cancel.cancel();
        second.await.unwrap().unwrap();

        assert_eq!(*handler.seen.lock().unwrap(), vec![(0, 0), (0, 1)]);
        assert_eq!(coordinator.generations(), 2);
    }

    #[tokio::test]
    async fn test_closed_coordinator_refuses_consume() {
        let coordinator = MemoryCoordinator::new("audit-events", 1);
        coordinator.close().await.unwrap();
        let result = coordinator
            .consume(
                &["audit-events".to_string()],
                Arc::new(AckAll::default()),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(GroupError::Closed)));
    }

    #[tokio::test]
    async fn test_unknown_topic_is_session_error() {
        let coordinator = MemoryCoordinator::new("audit-events", 1);
        let result = coordinator
            .consume(
                &["other".to_string()],
                Arc::new(AckAll::default()),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(GroupError::Session(_))));
    }
}

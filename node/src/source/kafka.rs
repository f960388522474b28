// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Kafka consumer group on librdkafka.
//!
//! Generations follow the group's rebalance callbacks: a revocation ends the
//! current generation, and the driver re-enters with the partitions assigned
//! afterwards. Claims are opened lazily on the first message fetched for a
//! partition.
//!
//! Offsets: `mark_message` stores `offset + 1` locally; librdkafka's
//! auto-commit publishes stored offsets, and `close` commits synchronously.
//! A generation that ends on a revocation or a fetch error drains every
//! message already handed to a claim, so the fetch position never runs ahead
//! of what was processed.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::{Message, TopicPartitionList};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::KafkaConfig;
use crate::ingest::{
    Generation, GroupCoordinator, GroupError, GroupHandler, GroupResult, GroupSession, SourceMessage,
};

const CLAIM_BUFFER: usize = 256;

type Assignment = HashSet<(String, i32)>;
type GroupConsumer = StreamConsumer<RebalanceContext>;

#[derive(Debug)]
enum RebalanceEvent {
    Assigned(Assignment),
    Revoked(Assignment),
}

fn partitions(list: &TopicPartitionList) -> Assignment {
    list.elements()
        .iter()
        .map(|elem| (elem.topic().to_string(), elem.partition()))
        .collect()
}

/// Forwards rebalance callbacks to the coordinator.
///
/// Callbacks run inside the consumer poll, so they only enqueue.
struct RebalanceContext {
    events: mpsc::UnboundedSender<RebalanceEvent>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Revoke(list) => {
                let _ = self.events.send(RebalanceEvent::Revoked(partitions(list)));
            }
            Rebalance::Assign(_) => {}
            Rebalance::Error(e) => tracing::warn!(error = %e, "rebalance error"),
        }
    }

    fn post_rebalance(&self, _consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(list) = rebalance {
            let _ = self.events.send(RebalanceEvent::Assigned(partitions(list)));
        }
    }
}

/// Rebalance notifications plus the partitions they leave assigned.
struct Membership {
    events: mpsc::UnboundedReceiver<RebalanceEvent>,
    assigned: Assignment,
}

struct KafkaSession {
    generation: u64,
    token: CancellationToken,
    consumer: Arc<GroupConsumer>,
}

impl GroupSession for KafkaSession {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn mark_message(&self, message: &SourceMessage) {
        if let Err(e) = self
            .consumer
            .store_offset(&message.topic, message.partition, message.offset + 1)
        {
            tracing::warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "failed to store offset"
            );
        }
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }
}

pub struct KafkaCoordinator {
    consumer: Arc<GroupConsumer>,
    membership: tokio::sync::Mutex<Membership>,
    subscribed: Mutex<Option<Vec<String>>>,
    generation: AtomicU64,
    closed: CancellationToken,
}

impl KafkaCoordinator {
    pub fn new(config: &KafkaConfig) -> GroupResult<Self> {
        let brokers = config.brokers.join(",");
        let (events, receiver) = mpsc::unbounded_channel();
        let consumer: GroupConsumer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("group.id", &config.group_id)
            .set("partition.assignment.strategy", "roundrobin")
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "true")
            .set("auto.commit.interval.ms", "1000")
            .set("enable.auto.offset.store", "false")
            .create_with_context(RebalanceContext { events })
            .map_err(|e| GroupError::Session(format!("creating consumer: {}", e)))?;

        tracing::info!(brokers = %brokers, group = %config.group_id, "kafka consumer created");
        Ok(Self {
            consumer: Arc::new(consumer),
            membership: tokio::sync::Mutex::new(Membership {
                events: receiver,
                assigned: Assignment::new(),
            }),
            subscribed: Mutex::new(None),
            generation: AtomicU64::new(0),
            closed: CancellationToken::new(),
        })
    }

    fn subscribe(&self, topics: &[String]) -> GroupResult<()> {
        let mut subscribed = self.subscribed.lock().unwrap_or_else(PoisonError::into_inner);
        if subscribed.as_deref() == Some(topics) {
            return Ok(());
        }
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&names)
            .map_err(|e| GroupError::Session(format!("subscribing to {:?}: {}", topics, e)))?;
        tracing::info!(?topics, "subscribed");
        *subscribed = Some(topics.to_vec());
        Ok(())
    }
}

#[async_trait]
impl GroupCoordinator for KafkaCoordinator {
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
        cancel: &CancellationToken,
    ) -> GroupResult<()> {
        if self.closed.is_cancelled() {
            return Err(GroupError::Closed);
        }
        self.subscribe(topics)?;
        let mut membership = self.membership.lock().await;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Arc::new(KafkaSession {
            generation,
            token: cancel.child_token(),
            consumer: self.consumer.clone(),
        });
        let mut running = Generation::start(handler, session, Vec::new()).await?;

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = self.closed.cancelled() => break Ok(()),
                Some(event) = membership.events.recv() => match event {
                    RebalanceEvent::Assigned(added) => {
                        tracing::info!(generation, partitions = added.len(), "partitions assigned");
                        membership.assigned.extend(added);
                    }
                    RebalanceEvent::Revoked(revoked) => {
                        membership.assigned.retain(|p| !revoked.contains(p));
                        if !revoked.is_empty() {
                            tracing::info!(generation, partitions = revoked.len(), "partitions revoked, ending session");
                            break Ok(());
                        }
                    }
                },
                received = self.consumer.recv() => {
                    let message = match received {
                        Ok(msg) => SourceMessage {
                            topic: msg.topic().to_string(),
                            partition: msg.partition(),
                            offset: msg.offset(),
                            payload: msg.payload().unwrap_or_default().to_vec(),
                        },
                        Err(e) => break Err(GroupError::Session(e.to_string())),
                    };
                    running.dispatch(message, CLAIM_BUFFER).await;
                }
            }
        };

        // On shutdown the session token is already cancelled and queued
        // messages stay unstored; otherwise `finish` drains them first.
        let finished = running.finish().await;
        outcome.and(finished)
    }

    async fn close(&self) -> GroupResult<()> {
        self.closed.cancel();
        if let Err(e) = self.consumer.commit_consumer_state(CommitMode::Sync) {
            tracing::warn!(error = %e, "final offset commit failed");
        }
        self.consumer.unsubscribe();
        tracing::info!("kafka consumer group closed");
        Ok(())
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Partition consumer: the group handler that feeds the event buffer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use witness_core::{AuditEvent, EventBuffer};

use super::flusher::{FlushReason, Flusher};
use super::group::{Claim, GroupHandler, GroupResult, GroupSession, SourceMessage};

/// Lifecycle of one partition claim as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimState {
    Idle,
    Consuming,
    Draining,
}

/// What happened to a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Decoded and appended; `size` is the buffer length after the append.
    Buffered { size: usize, flushed: bool },
    /// Undecodable payload, acknowledged and skipped.
    Dropped,
}

pub struct EventConsumer {
    buffer: Arc<EventBuffer>,
    flusher: Arc<Flusher>,
    claims: Mutex<HashMap<(String, i32), ClaimState>>,
    ready: watch::Sender<Option<u64>>,
}

impl EventConsumer {
    pub fn new(flusher: Arc<Flusher>) -> Self {
        let (ready, _) = watch::channel(None);
        Self {
            buffer: flusher.buffer().clone(),
            flusher,
            claims: Mutex::new(HashMap::new()),
            ready,
        }
    }

    /// Generation of the active session, `None` between sessions.
    pub fn ready(&self) -> watch::Receiver<Option<u64>> {
        self.ready.subscribe()
    }

    pub fn claim_state(&self, topic: &str, partition: i32) -> ClaimState {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(topic.to_string(), partition))
            .copied()
            .unwrap_or(ClaimState::Idle)
    }

    fn set_claim_state(&self, topic: &str, partition: i32, state: ClaimState) {
        self.claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((topic.to_string(), partition), state);
    }

    /// Decode, buffer and acknowledge one message.
    ///
    /// Malformed payloads are acknowledged too, so a poison message is never
    /// redelivered.
    pub async fn process_message(
        &self,
        session: &dyn GroupSession,
        message: &SourceMessage,
    ) -> MessageOutcome {
        let event = match AuditEvent::decode(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "dropping malformed message"
                );
                metrics::counter!("witness_events_dropped_total", 1);
                session.mark_message(message);
                return MessageOutcome::Dropped;
            }
        };

        let size = self.buffer.append(event);
        metrics::counter!("witness_events_buffered_total", 1);
        metrics::gauge!("witness_buffer_size", size as f64);

        let flushed = self.buffer.is_full(size);
        if flushed {
            tracing::debug!(size, "buffer full, flushing");
            self.flusher.flush(FlushReason::Size).await;
        }

        session.mark_message(message);
        metrics::counter!("witness_messages_acked_total", 1);
        MessageOutcome::Buffered { size, flushed }
    }
}

#[async_trait]
impl GroupHandler for EventConsumer {
    async fn setup(&self, session: Arc<dyn GroupSession>) -> GroupResult<()> {
        tracing::info!(generation = session.generation(), "consumer session setup");
        self.ready.send_replace(Some(session.generation()));
        Ok(())
    }

    async fn cleanup(&self, session: Arc<dyn GroupSession>) -> GroupResult<()> {
        tracing::info!(generation = session.generation(), "consumer session cleanup, flushing buffer");
        self.flusher.flush(FlushReason::SessionEnd).await;
        self.claims.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.ready.send_replace(None);
        Ok(())
    }

    async fn consume_claim(&self, session: Arc<dyn GroupSession>, mut claim: Claim) -> GroupResult<()> {
        let topic = claim.topic.clone();
        let partition = claim.partition;
        tracing::info!(
            topic = %topic,
            partition,
            initial_offset = claim.initial_offset,
            "claim started"
        );
        self.set_claim_state(&topic, partition, ClaimState::Consuming);

        loop {
            tokio::select! {
                next = claim.next() => match next {
                    Some(message) => {
                        self.process_message(session.as_ref(), &message).await;
                    }
                    None => {
                        tracing::debug!(topic = %topic, partition, "claim stream closed");
                        break;
                    }
                },
                _ = session.token().cancelled() => {
                    tracing::debug!(topic = %topic, partition, "session cancelled");
                    break;
                }
            }
        }

        // Terminal for this claim; session-end resets every claim to idle.
        self.set_claim_state(&topic, partition, ClaimState::Draining);
        tracing::info!(topic = %topic, partition, "claim stopped");
        Ok(())
    }
}

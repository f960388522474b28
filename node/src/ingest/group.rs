// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Consumer-group session model.
//!
//! A coordinator runs one *generation* per call to
//! [`GroupCoordinator::consume`]: session-begin (`setup`), one
//! `consume_claim` task per assigned partition, then session-end (`cleanup`)
//! once every claim has stopped. The call returns on rebalance, so
//! [`run_group`] keeps re-entering it until the token is cancelled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pause after a failed generation before re-entering, so a broken
/// coordinator does not spin.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum GroupError {
    /// The coordinator was closed; no further generations will run.
    #[error("consumer group closed")]
    Closed,
    #[error("session error: {0}")]
    Session(String),
}

pub type GroupResult<T> = Result<T, GroupError>;

/// One message from a partition, payload still undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Per-generation session handle shared by every claim of that generation.
pub trait GroupSession: Send + Sync {
    fn generation(&self) -> u64;

    /// Acknowledge `message`; the committed position becomes `offset + 1`.
    fn mark_message(&self, message: &SourceMessage);

    /// Cancelled when the generation ends (rebalance or shutdown).
    fn token(&self) -> &CancellationToken;
}

/// A partition assignment for the duration of one generation.
///
/// The message stream closes when the coordinator revokes the partition.
pub struct Claim {
    pub topic: String,
    pub partition: i32,
    pub initial_offset: i64,
    messages: mpsc::Receiver<SourceMessage>,
}

impl Claim {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        initial_offset: i64,
        messages: mpsc::Receiver<SourceMessage>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            initial_offset,
            messages,
        }
    }

    /// Next message, or `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<SourceMessage> {
        self.messages.recv().await
    }
}

/// Session lifecycle callbacks the coordinator invokes.
#[async_trait]
pub trait GroupHandler: Send + Sync {
    /// Session-begin: once per generation, before any claim runs.
    async fn setup(&self, session: Arc<dyn GroupSession>) -> GroupResult<()>;

    /// Session-end: after every claim of the generation returned.
    async fn cleanup(&self, session: Arc<dyn GroupSession>) -> GroupResult<()>;

    /// Process one claim until its stream closes or the session is cancelled.
    async fn consume_claim(&self, session: Arc<dyn GroupSession>, claim: Claim) -> GroupResult<()>;
}

/// Membership protocol. `consume` blocks for one generation.
#[async_trait]
pub trait GroupCoordinator: Send + Sync {
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
        cancel: &CancellationToken,
    ) -> GroupResult<()>;

    /// Leave the group and release connections. Later `consume` calls fail with
    /// [`GroupError::Closed`].
    async fn close(&self) -> GroupResult<()>;
}

/// A running generation: setup done, claim tasks spawned.
///
/// Coordinators use this to share the setup → claims → cleanup ordering.
pub struct Generation {
    handler: Arc<dyn GroupHandler>,
    session: Arc<dyn GroupSession>,
    claims: Vec<(String, i32, JoinHandle<GroupResult<()>>)>,
    routes: HashMap<(String, i32), mpsc::Sender<SourceMessage>>,
}

impl Generation {
    /// Run session-begin, then spawn one task per claim.
    pub async fn start(
        handler: Arc<dyn GroupHandler>,
        session: Arc<dyn GroupSession>,
        claims: Vec<Claim>,
    ) -> GroupResult<Self> {
        handler.setup(session.clone()).await?;
        tracing::info!(
            generation = session.generation(),
            claims = claims.len(),
            "consumer group session started"
        );

        let mut generation = Self {
            handler,
            session,
            claims: Vec::new(),
            routes: HashMap::new(),
        };
        for claim in claims {
            generation.spawn_claim(claim);
        }
        Ok(generation)
    }

    /// Start a claim discovered after setup, e.g. on the first fetched message.
    pub fn spawn_claim(&mut self, claim: Claim) {
        let topic = claim.topic.clone();
        let partition = claim.partition;
        let handler = self.handler.clone();
        let session = self.session.clone();
        let task = tokio::spawn(async move { handler.consume_claim(session, claim).await });
        self.claims.push((topic, partition, task));
    }

    /// Hand a fetched message to its partition's claim, opening the claim on
    /// the partition's first message.
    ///
    /// Waits while the claim's queue is full.
    pub async fn dispatch(&mut self, message: SourceMessage, capacity: usize) {
        let key = (message.topic.clone(), message.partition);
        if !self.routes.contains_key(&key) {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            self.spawn_claim(Claim::new(message.topic.clone(), message.partition, message.offset, rx));
            self.routes.insert(key.clone(), tx);
        }
        if let Some(route) = self.routes.get(&key) {
            if route.send(message).await.is_err() {
                tracing::warn!(
                    topic = %key.0,
                    partition = key.1,
                    "claim stopped before its queue was drained"
                );
            }
        }
    }

    pub fn session(&self) -> &Arc<dyn GroupSession> {
        &self.session
    }

    /// Wait for every claim to stop, then run session-end.
    ///
    /// Dispatched claims are closed here and process everything already
    /// queued, unless the session token was cancelled first. Callers close any
    /// other claim streams or cancel the session token before calling this.
    pub async fn finish(mut self) -> GroupResult<()> {
        self.routes.clear();
        let (keys, tasks): (Vec<_>, Vec<_>) = self
            .claims
            .into_iter()
            .map(|(topic, partition, task)| ((topic, partition), task))
            .unzip();
        let results = futures::future::join_all(tasks).await;
        for ((topic, partition), result) in keys.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(topic = %topic, partition, error = %e, "claim ended with error")
                }
                Err(e) => {
                    tracing::error!(topic = %topic, partition, error = %e, "claim task panicked")
                }
            }
        }
        self.session.token().cancel();
        let result = self.handler.cleanup(self.session.clone()).await;
        tracing::info!(generation = self.session.generation(), "consumer group session ended");
        result
    }
}

/// Driver loop: re-enter `consume` after every rebalance until cancelled or closed.
pub async fn run_group(
    coordinator: Arc<dyn GroupCoordinator>,
    topics: Vec<String>,
    handler: Arc<dyn GroupHandler>,
    cancel: CancellationToken,
) {
    tracing::info!(?topics, "consumer group driver started");
    loop {
        match coordinator.consume(&topics, handler.clone(), &cancel).await {
            Ok(()) => {}
            Err(GroupError::Closed) => {
                tracing::info!("consumer group closed");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "error from consumer group");
                if !cancel.is_cancelled() {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            tracing::info!("context cancelled, stopping consumer group");
            return;
        }
        tracing::debug!("rebalance, re-entering consume");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays back a fixed sequence of `consume` outcomes.
    struct Scripted {
        outcomes: Mutex<VecDeque<GroupResult<()>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<GroupResult<()>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl GroupCoordinator for Scripted {
        async fn consume(
            &self,
            _topics: &[String],
            _handler: Arc<dyn GroupHandler>,
            _cancel: &CancellationToken,
        ) -> GroupResult<()> {
            *self.calls.lock().unwrap() += 1;
            let next = self.outcomes.lock().unwrap().pop_front();
            next.unwrap_or(Err(GroupError::Closed))
        }

        async fn close(&self) -> GroupResult<()> {
            Ok(())
        }
    }

    struct Noop;

    #[async_trait]
    impl GroupHandler for Noop {
        async fn setup(&self, _session: Arc<dyn GroupSession>) -> GroupResult<()> {
            Ok(())
        }

        async fn cleanup(&self, _session: Arc<dyn GroupSession>) -> GroupResult<()> {
            Ok(())
        }

        async fn consume_claim(&self, _session: Arc<dyn GroupSession>, _claim: Claim) -> GroupResult<()> {
            Ok(())
        }
    }

    /// Slow handler that records every offset it is handed.
    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(i32, i64)>>,
        claims: Mutex<Vec<(i32, i64)>>,
        cleanups: Mutex<u32>,
    }

    #[async_trait]
    impl GroupHandler for Recording {
        async fn setup(&self, _session: Arc<dyn GroupSession>) -> GroupResult<()> {
            Ok(())
        }

        async fn cleanup(&self, _session: Arc<dyn GroupSession>) -> GroupResult<()> {
            *self.cleanups.lock().unwrap() += 1;
            Ok(())
        }

        async fn consume_claim(&self, session: Arc<dyn GroupSession>, mut claim: Claim) -> GroupResult<()> {
            self.claims.lock().unwrap().push((claim.partition, claim.initial_offset));
            loop {
                tokio::select! {
                    biased;
                    _ = session.token().cancelled() => return Ok(()),
                    next = claim.next() => match next {
                        Some(message) => {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            self.seen.lock().unwrap().push((message.partition, message.offset));
                        }
                        None => return Ok(()),
                    },
                }
            }
        }
    }

    struct Session {
        token: CancellationToken,
    }

    impl GroupSession for Session {
        fn generation(&self) -> u64 {
            1
        }

        fn mark_message(&self, _message: &SourceMessage) {}

        fn token(&self) -> &CancellationToken {
            &self.token
        }
    }

    fn fetched(partition: i32, offset: i64) -> SourceMessage {
        SourceMessage {
            topic: "t".into(),
            partition,
            offset,
            payload: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_finish_drains_dispatched_messages() {
        let handler = Arc::new(Recording::default());
        let session = Arc::new(Session {
            token: CancellationToken::new(),
        });
        let mut running = Generation::start(handler.clone(), session, Vec::new()).await.unwrap();

        for offset in 0..6 {
            running.dispatch(fetched((offset % 2) as i32, 40 + offset), 16).await;
        }
        running.finish().await.unwrap();

        let mut seen = handler.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![(0, 40), (0, 42), (0, 44), (1, 41), (1, 43), (1, 45)]);

        let mut claims = handler.claims.lock().unwrap().clone();
        claims.sort();
        assert_eq!(claims, vec![(0, 40), (1, 41)]);
        assert_eq!(*handler.cleanups.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_finish_after_cancel_skips_queued_messages() {
        let handler = Arc::new(Recording::default());
        let token = CancellationToken::new();
        let session = Arc::new(Session { token: token.clone() });
        let mut running = Generation::start(handler.clone(), session, Vec::new()).await.unwrap();

        for offset in 0..8 {
            running.dispatch(fetched(0, offset), 16).await;
        }
        token.cancel();
        running.finish().await.unwrap();

        assert!(handler.seen.lock().unwrap().len() <= 1);
        assert_eq!(*handler.cleanups.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_reenters_until_closed() {
        let coordinator = Arc::new(Scripted::new(vec![
            Ok(()),
            Err(GroupError::Session("broker down".into())),
            Ok(()),
        ]));

        let started = tokio::time::Instant::now();
        run_group(coordinator.clone(), vec!["t".into()], Arc::new(Noop), CancellationToken::new()).await;

        assert_eq!(*coordinator.calls.lock().unwrap(), 4);
        assert!(started.elapsed() >= ERROR_BACKOFF);
    }

    #[tokio::test]
    async fn test_driver_stops_when_cancelled() {
        let coordinator = Arc::new(Scripted::new(vec![Ok(()), Ok(()), Ok(())]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_group(coordinator.clone(), vec!["t".into()], Arc::new(Noop), cancel).await;
        assert_eq!(*coordinator.calls.lock().unwrap(), 1);
    }
}

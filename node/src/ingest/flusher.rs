// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Buffer flushing: the single place that turns buffered events into a sink write.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use witness_core::EventBuffer;

use crate::sink::BatchSink;

/// Why a flush happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Buffer reached capacity on append.
    Size,
    /// Periodic timer tick.
    Interval,
    /// Consumer-group session ended (rebalance).
    SessionEnd,
    /// Final flush during shutdown.
    Shutdown,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Interval => "interval",
            FlushReason::SessionEnd => "session_end",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub flushes: u64,
    pub flushed_events: u64,
    pub failures: u64,
}

pub struct Flusher {
    buffer: Arc<EventBuffer>,
    sink: Arc<dyn BatchSink>,
    flushes: AtomicU64,
    flushed_events: AtomicU64,
    failures: AtomicU64,
}

impl Flusher {
    pub fn new(buffer: Arc<EventBuffer>, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            buffer,
            sink,
            flushes: AtomicU64::new(0),
            flushed_events: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    /// Take the buffered batch and write it. Returns the batch size.
    ///
    /// The buffer lock is released before the write, so appends continue while
    /// the sink is slow. A failed write is logged and counted; its events are
    /// not requeued.
    pub async fn flush(&self, reason: FlushReason) -> usize {
        let batch = self.buffer.flush_and_clear();
        metrics::gauge!("witness_buffer_size", 0.0);
        if batch.is_empty() {
            return 0;
        }

        let count = batch.len();
        let started = Instant::now();
        let result = self.sink.write_batch(&batch).await;
        metrics::histogram!("witness_flush_duration_seconds", started.elapsed().as_secs_f64());
        metrics::counter!("witness_flushes_total", 1, "reason" => reason.as_str());
        self.flushes.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(()) => {
                self.flushed_events.fetch_add(count as u64, Ordering::Relaxed);
                metrics::counter!("witness_flushed_events_total", count as u64);
                tracing::info!(count, reason = reason.as_str(), "flushed events to store");
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("witness_flush_failures_total", 1);
                tracing::error!(count, reason = reason.as_str(), error = %e, "failed to flush events to store");
            }
        }
        count
    }

    pub fn stats(&self) -> FlushStats {
        FlushStats {
            flushes: self.flushes.load(Ordering::Relaxed),
            flushed_events: self.flushed_events.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Periodic flush task.
pub struct FlushTrigger {
    flusher: Arc<Flusher>,
    period: Duration,
}

impl FlushTrigger {
    pub fn new(flusher: Arc<Flusher>, period: Duration) -> Self {
        Self { flusher, period }
    }

    /// Tick every `period` until cancelled, then flush one last time.
    ///
    /// Cancellation only interrupts the wait, never a write in progress.
    pub async fn run(self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.period;
        let mut ticker = tokio::time::interval_at(start, self.period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.flusher.flush(FlushReason::Interval).await;
                }
            }
        }

        tracing::info!("flush trigger stopping, performing final flush");
        self.flusher.flush(FlushReason::Shutdown).await;
    }
}

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Event Buffer - Pending Batch Management
//!
//! Accumulates decoded events between acknowledgement and durable write.
//!
//! # Semantics
//! - `append` always succeeds; capacity is a flush *trigger*, not a hard limit
//! - `flush_and_clear` hands the whole pending batch to the caller and leaves
//!   the buffer empty in one step
//! - append and flush never interleave: both go through the same lock, which
//!   is held only for the in-memory mutation
//!
//! # Flow
//! 1. append() - partition workers add decoded events
//! 2. is_full() - size check on the value returned by append
//! 3. flush_and_clear() - flusher captures the batch, writes it after unlocking

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::event::AuditEvent;

/// Shared, mutex-guarded pending batch.
#[derive(Debug)]
pub struct EventBuffer {
    pending: Mutex<Vec<AuditEvent>>,
    capacity: usize,
}

impl EventBuffer {
    /// Create an empty buffer that asks for a flush once `capacity` events are pending.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            pending: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append one event and return the pending count after the append.
    pub fn append(&self, event: AuditEvent) -> usize {
        let mut pending = self.lock();
        pending.push(event);
        pending.len()
    }

    /// Capture every pending event and reset the buffer to empty.
    ///
    /// Callers outside the lock never observe a half-drained buffer.
    pub fn flush_and_clear(&self) -> Vec<AuditEvent> {
        let mut pending = self.lock();
        if pending.is_empty() {
            return Vec::new();
        }
        std::mem::replace(&mut *pending, Vec::with_capacity(self.capacity))
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Flush threshold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a size returned by [`append`](Self::append) reached the threshold.
    pub fn is_full(&self, size: usize) -> bool {
        size >= self.capacity
    }

    // A panic while holding the lock cannot leave the Vec half-mutated, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

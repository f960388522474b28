// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ingestion Pipeline
//!
//! Moves audit events from a partitioned log into the batch sink.
//!
//! # Architecture
//! - Group driver = re-enters the coordinator after every rebalance
//! - Partition consumer = one task per claim: decode, append, acknowledge
//! - Flush trigger = periodic timer flush plus the final flush on shutdown
//! - Event buffer = the only shared mutable state
//!
//! # Guarantees
//! - A flush triggered by size or time never races a concurrent append
//! - Session end always flushes, so a rebalance never strands buffered events
//! - A sink write in flight is never aborted by cancellation
//! - Offsets are acknowledged after the append, before the durable write

pub mod consumer;
pub mod flusher;
pub mod group;

pub use consumer::{ClaimState, EventConsumer, MessageOutcome};
pub use flusher::{FlushReason, FlushStats, FlushTrigger, Flusher};
pub use group::{
    run_group, Claim, Generation, GroupCoordinator, GroupError, GroupHandler, GroupResult,
    GroupSession, SourceMessage,
};

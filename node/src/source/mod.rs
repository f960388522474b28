// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Consumer-group coordinators.
//!
//! - [`MemoryCoordinator`]: in-process partitioned log, used by tests and demos
//! - `KafkaCoordinator`: librdkafka-backed group membership (feature `kafka`)

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

#[cfg(feature = "kafka")]
pub use kafka::KafkaCoordinator;
pub use memory::MemoryCoordinator;

// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! witness-core: audit-event model, wire decoding and the shared ingestion buffer.
//!
//! Everything in this crate is synchronous and runtime-agnostic. The async
//! pipeline (consumers, flush trigger, sinks) lives in `witness-node`.

pub mod buffer;
pub mod error;
pub mod event;
pub mod filter;

pub use buffer::EventBuffer;
pub use error::{DecodeError, DecodeResult};
pub use event::{Actor, AuditEvent, Entity, RequestContext, Security};
pub use filter::{EventFilter, SearchPage, SearchQuery};

#[cfg(test)]
mod tests;

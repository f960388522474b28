// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

/// Failure to turn a wire payload into an [`AuditEvent`](crate::event::AuditEvent).
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload is not valid JSON or does not match the event layout.
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The event carries no identifier, so it cannot be written idempotently.
    #[error("event_id is empty")]
    MissingId,
}

pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

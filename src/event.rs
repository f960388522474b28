// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Audit Event Record
//!
//! The unit flowing through the pipeline. Records are immutable once decoded;
//! the same JSON layout is used on the wire and in the search store.
//!
//! # Invariants
//! - `event_id` is the idempotency key for store writes: a re-delivered event
//!   with the same id replaces the stored copy instead of duplicating it.
//! - `event_id` is never empty after [`AuditEvent::decode`].
//! - Every other field may be missing or `null` on the wire and decodes to
//!   its zero value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{DecodeError, DecodeResult};

/// One audit event.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuditEvent {
    #[serde(deserialize_with = "nullable")]
    pub event_id: String,
    #[serde(deserialize_with = "nullable")]
    pub timestamp: DateTime<Utc>,
    #[serde(deserialize_with = "nullable")]
    pub status: String,
    #[serde(deserialize_with = "nullable")]
    pub event_type: String,
    #[serde(deserialize_with = "nullable")]
    pub actor: Actor,
    #[serde(deserialize_with = "nullable")]
    pub entity: Entity,
    #[serde(deserialize_with = "nullable")]
    pub context: RequestContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<Security>,
    /// Free-form detail attributes.
    #[serde(deserialize_with = "nullable", skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

/// Who performed the action.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Actor {
    #[serde(deserialize_with = "nullable")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub kind: String,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
    #[serde(deserialize_with = "nullable")]
    pub ip_address: String,
}

/// What the action was performed on.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Entity {
    #[serde(deserialize_with = "nullable")]
    pub id: String,
    #[serde(rename = "type", deserialize_with = "nullable")]
    pub kind: String,
    #[serde(deserialize_with = "nullable")]
    pub name: String,
}

/// Where the request came from.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RequestContext {
    #[serde(deserialize_with = "nullable")]
    pub source_service: String,
    #[serde(deserialize_with = "nullable")]
    pub trace_id: String,
    #[serde(deserialize_with = "nullable")]
    pub request_id: String,
}

/// Security classification of the action, e.g. `LOW`, `HIGH`, `CRITICAL`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Security {
    #[serde(deserialize_with = "nullable")]
    pub access_level: String,
}

/// `null` decodes like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl AuditEvent {
    /// Decode one wire payload.
    pub fn decode(payload: &[u8]) -> DecodeResult<Self> {
        let event: AuditEvent = serde_json::from_slice(payload)?;
        if event.event_id.trim().is_empty() {
            return Err(DecodeError::MissingId);
        }
        Ok(event)
    }

    /// Encode to the wire/store representation.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Look up a field by its dotted store path (`actor.id`, `security.access_level`).
    ///
    /// Only string leaves are returned; missing paths yield `None`.
    pub fn field(&self, path: &str) -> Option<&str> {
        match path {
            "event_id" => Some(&self.event_id),
            "status" => Some(&self.status),
            "event_type" => Some(&self.event_type),
            "actor.id" => Some(&self.actor.id),
            "actor.type" => Some(&self.actor.kind),
            "actor.name" => Some(&self.actor.name),
            "actor.ip_address" => Some(&self.actor.ip_address),
            "entity.id" => Some(&self.entity.id),
            "entity.type" => Some(&self.entity.kind),
            "entity.name" => Some(&self.entity.name),
            "context.source_service" => Some(&self.context.source_service),
            "context.trace_id" => Some(&self.context.trace_id),
            "context.request_id" => Some(&self.context.request_id),
            "security.access_level" => self.security.as_ref().map(|s| s.access_level.as_str()),
            _ => None,
        }
    }
}

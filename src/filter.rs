// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Query-side filter model.
//!
//! A structured filter is a set of optional exact-match constraints. Each set
//! field maps to one dotted store path; unset fields do not constrain.

use serde::{Deserialize, Serialize};

use crate::event::AuditEvent;

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: usize = 1000;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_access_level: Option<String>,
}

impl EventFilter {
    /// Set constraints as `(store path, expected value)` pairs, in a fixed order.
    pub fn terms(&self) -> Vec<(&'static str, &str)> {
        [
            ("status", &self.status),
            ("event_type", &self.event_type),
            ("actor.id", &self.actor_id),
            ("entity.id", &self.entity_id),
            ("security.access_level", &self.security_access_level),
        ]
        .into_iter()
        .filter_map(|(path, value)| value.as_deref().map(|v| (path, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.terms().is_empty()
    }

    /// Whether `event` satisfies every constraint.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.terms()
            .into_iter()
            .all(|(path, expected)| event.field(path) == Some(expected))
    }
}

/// A read-only query: filter plus pagination.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchQuery {
    #[serde(default)]
    pub filter: EventFilter,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            filter: EventFilter::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl SearchQuery {
    pub fn new(filter: EventFilter, limit: Option<usize>, offset: Option<usize>) -> Self {
        Self {
            filter,
            limit: limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// One page of results and the total number of matches.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchPage {
    pub events: Vec<AuditEvent>,
    pub total: u64,
}

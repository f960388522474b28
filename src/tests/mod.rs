// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod buffer_tests;

use crate::event::{Actor, AuditEvent, Entity, RequestContext};
use chrono::{TimeZone, Utc};

pub(crate) fn sample_event(id: &str) -> AuditEvent {
    AuditEvent {
        event_id: id.to_string(),
        timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        status: "SUCCESS".to_string(),
        event_type: "user.login".to_string(),
        actor: Actor {
            id: "u-1".to_string(),
            kind: "user".to_string(),
            name: "alice".to_string(),
            ip_address: "10.0.0.1".to_string(),
        },
        entity: Entity {
            id: "acct-9".to_string(),
            kind: "account".to_string(),
            name: "main".to_string(),
        },
        context: RequestContext {
            source_service: "auth".to_string(),
            trace_id: "t-1".to_string(),
            request_id: "r-1".to_string(),
        },
        security: None,
        details: Default::default(),
    }
}

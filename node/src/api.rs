// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use serde::{Deserialize, Serialize};
use witness_core::{AuditEvent, EventFilter, SearchPage, SearchQuery};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(default)]
    pub filter: EventFilter,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SearchRequest {
    pub fn into_query(self) -> SearchQuery {
        SearchQuery::new(self.filter, self.limit, self.offset)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub events: Vec<AuditEvent>,
    pub total: u64,
}

impl From<SearchPage> for SearchResponse {
    fn from(page: SearchPage) -> Self {
        Self {
            events: page.events,
            total: page.total,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

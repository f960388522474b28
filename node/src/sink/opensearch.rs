// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! OpenSearch store client.
//!
//! Writes go through `_bulk` with `_id = event_id`, which makes re-delivered
//! events overwrite instead of duplicate. Reads translate an
//! [`EventFilter`](witness_core::EventFilter) into a `bool.filter` of `term`
//! clauses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use witness_core::{AuditEvent, EventFilter, SearchPage, SearchQuery};

use super::{BatchSink, EventStore, SinkError, SinkResult};

/// Statuses the transport retries on its own.
const RETRY_STATUSES: [StatusCode; 4] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Transport-level retry on overload/unavailable responses. Backoff grows linearly.
#[derive(Debug, Clone, Copy)]
pub struct TransportRetry {
    pub max_retries: u32,
    pub backoff_unit: Duration,
}

impl Default for TransportRetry {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenSearchClient {
    base_url: String,
    index: String,
    client: Client,
    retry: TransportRetry,
}

impl OpenSearchClient {
    pub fn new(url: &str, index: &str) -> SinkResult<Self> {
        Self::with_retry(url, index, TransportRetry::default())
    }

    pub fn with_retry(url: &str, index: &str, retry: TransportRetry) -> SinkResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            index: index.to_string(),
            client,
            retry,
        })
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Check that the cluster answers.
    pub async fn ping(&self) -> SinkResult<()> {
        let resp = self.send(|| self.request(Method::GET, "/")).await?;
        ensure_success(resp).await?;
        tracing::debug!("OpenSearch ping ok at {}", self.base_url);
        Ok(())
    }

    /// Create the index with the audit-event mapping unless it already exists.
    pub async fn ensure_index(&self) -> SinkResult<()> {
        self.ping().await?;

        let path = format!("/{}", self.index);
        let resp = self.send(|| self.request(Method::HEAD, &path)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            tracing::info!(index = %self.index, "index not found, creating it");
            return self.create_index().await;
        }
        ensure_success(resp).await?;
        tracing::info!(index = %self.index, "index already exists");
        Ok(())
    }

    async fn create_index(&self) -> SinkResult<()> {
        let path = format!("/{}", self.index);
        let body = index_mapping();
        let resp = self
            .send(|| self.request(Method::PUT, &path).json(&body))
            .await?;
        ensure_success(resp).await?;
        tracing::info!(index = %self.index, "index created");
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    async fn send<F>(&self, build: F) -> SinkResult<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let resp = build().send().await?;
            if attempt >= self.retry.max_retries || !RETRY_STATUSES.contains(&resp.status()) {
                return Ok(resp);
            }
            attempt += 1;
            let backoff = self.retry.backoff_unit * attempt;
            tracing::warn!(
                status = resp.status().as_u16(),
                attempt,
                "OpenSearch overloaded, retrying in {:?}",
                backoff
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

/// NDJSON body for `_bulk`: one action line and one source line per event.
pub fn bulk_body(index: &str, events: &[AuditEvent]) -> SinkResult<String> {
    let mut body = String::new();
    for event in events {
        let action = json!({ "index": { "_index": index, "_id": event.event_id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(event)?);
        body.push('\n');
    }
    Ok(body)
}

/// Search request body for a query.
pub fn search_body(query: &SearchQuery) -> Value {
    json!({
        "query": filter_query(&query.filter),
        "from": query.offset,
        "size": query.limit,
        "sort": [{ "timestamp": { "order": "desc" } }],
        "track_total_hits": true,
    })
}

fn filter_query(filter: &EventFilter) -> Value {
    let terms = filter.terms();
    if terms.is_empty() {
        return json!({ "match_all": {} });
    }
    let clauses: Vec<Value> = terms
        .into_iter()
        .map(|(path, value)| json!({ "term": { path: value } }))
        .collect();
    json!({ "bool": { "filter": clauses } })
}

fn index_mapping() -> Value {
    let keyword = json!({ "type": "keyword" });
    let text = json!({ "type": "text" });
    json!({
        "settings": {
            "number_of_shards": 1,
            "number_of_replicas": 0
        },
        "mappings": {
            "properties": {
                "event_id": keyword,
                "timestamp": { "type": "date_nanos" },
                "status": keyword,
                "event_type": keyword,
                "actor": { "properties": {
                    "id": keyword, "type": keyword, "name": text,
                    "ip_address": { "type": "ip" }
                }},
                "entity": { "properties": {
                    "id": keyword, "type": keyword, "name": text
                }},
                "context": { "properties": {
                    "source_service": keyword, "trace_id": keyword, "request_id": keyword
                }},
                "security": { "properties": { "access_level": keyword }},
                "details": { "type": "flattened" }
            }
        }
    })
}

async fn ensure_success(resp: Response) -> SinkResult<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(SinkError::Status { status, body })
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl BulkResponse {
    fn failed_items(&self) -> usize {
        self.items
            .iter()
            .filter_map(|item| item.as_object()?.values().next()?.get("error"))
            .count()
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Deserialize)]
struct Hits {
    total: Total,
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Total {
    value: u64,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: AuditEvent,
}

#[async_trait]
impl BatchSink for OpenSearchClient {
    async fn write_batch(&self, events: &[AuditEvent]) -> SinkResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let body = bulk_body(&self.index, events)?;
        let resp = self
            .send(|| {
                self.request(Method::POST, "/_bulk")
                    .header("content-type", "application/x-ndjson")
                    .body(body.clone())
            })
            .await?;
        let resp = ensure_success(resp).await?;

        let bulk: BulkResponse = resp.json().await?;
        if bulk.errors {
            let failed = bulk.failed_items().max(1);
            return Err(SinkError::Rejected {
                failed,
                total: events.len(),
            });
        }
        tracing::debug!(count = events.len(), "bulk indexed events");
        Ok(())
    }
}

#[async_trait]
impl EventStore for OpenSearchClient {
    async fn search(&self, query: &SearchQuery) -> SinkResult<SearchPage> {
        let path = format!("/{}/_search", self.index);
        let body = search_body(query);
        let resp = self
            .send(|| self.request(Method::POST, &path).json(&body))
            .await?;
        let resp = ensure_success(resp).await?;

        let parsed: SearchResponse = resp.json().await?;
        Ok(SearchPage {
            events: parsed.hits.hits.into_iter().map(|h| h.source).collect(),
            total: parsed.hits.total.value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use witness_core::event::{Actor, Entity, RequestContext};

    fn event(id: &str) -> AuditEvent {
        AuditEvent {
            event_id: id.to_string(),
            timestamp: "2025-03-01T12:00:00Z".parse().unwrap(),
            status: "SUCCESS".into(),
            event_type: "user.login".into(),
            actor: Actor::default(),
            entity: Entity::default(),
            context: RequestContext::default(),
            security: None,
            details: Default::default(),
        }
    }

    #[test]
    fn test_bulk_body_uses_event_id() {
        let body = bulk_body("audit-events", &[event("a"), event("b")]).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);

        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "audit-events");
        assert_eq!(action["index"]["_id"], "a");
        let source: Value = serde_json::from_str(lines[3]).unwrap();
        assert_eq!(source["event_id"], "b");
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_search_body_translation() {
        let query = SearchQuery::new(
            EventFilter {
                status: Some("FAILURE".into()),
                actor_id: Some("u-1".into()),
                ..Default::default()
            },
            Some(5),
            Some(10),
        );
        let body = search_body(&query);
        assert_eq!(body["from"], 10);
        assert_eq!(body["size"], 5);
        let clauses = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(clauses.len(), 2);
        assert_eq!(clauses[0]["term"]["status"], "FAILURE");
        assert_eq!(clauses[1]["term"]["actor.id"], "u-1");
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let body = search_body(&SearchQuery::default());
        assert!(body["query"]["match_all"].is_object());
        assert_eq!(body["size"], 20);
    }

    #[test]
    fn test_failed_items_counted() {
        let bulk: BulkResponse = serde_json::from_value(json!({
            "errors": true,
            "items": [
                {"index": {"_id": "a", "status": 201}},
                {"index": {"_id": "b", "status": 400, "error": {"type": "mapper_parsing_exception"}}}
            ]
        }))
        .unwrap();
        assert_eq!(bulk.failed_items(), 1);
    }
}

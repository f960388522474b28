// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request as AxumRequest, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::TypedHeader;
use headers::authorization::Bearer;
use headers::Authorization;
use tower_http::trace::TraceLayer;

use crate::api::{HealthResponse, SearchRequest, SearchResponse};
use crate::errors::NodeError;
use crate::sink::EventStore;

pub type SharedStore = Arc<dyn EventStore>;

async fn auth_guard(
    State(token): State<Arc<String>>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    req: AxumRequest,
    next: Next,
) -> Result<Response, StatusCode> {
    match bearer {
        Some(TypedHeader(Authorization(provided))) if provided.token() == token.as_str() => {
            Ok(next.run(req).await)
        }
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Routes: `/healthz` and `/metrics` are always open, `/v1/*` sits behind the
/// bearer guard when a token is configured.
pub fn build_router(store: SharedStore, auth_token: Option<String>) -> Router {
    let mut v1 = Router::new()
        .route("/events/search", post(search_events))
        .with_state(store);

    if let Some(token) = auth_token {
        tracing::info!("Auth Enabled: Bearer token required");
        v1 = v1.layer(from_fn_with_state(Arc::new(token), auth_guard));
    } else {
        tracing::warn!("Auth Disabled: No token configured");
    }

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn search_events(
    State(store): State<SharedStore>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, NodeError> {
    let Json(payload) = payload?;
    let query = payload.into_query();
    tracing::debug!(filter = ?query.filter, limit = query.limit, offset = query.offset, "searching events");
    let page = store.search(&query).await?;
    Ok(Json(page.into()))
}

async fn metrics_handler() -> String {
    crate::telemetry::get_metrics()
}

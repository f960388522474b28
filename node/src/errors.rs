// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::sink::SinkError;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Store error: {0}")]
    Store(#[from] SinkError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<JsonRejection> for NodeError {
    fn from(rejection: JsonRejection) -> Self {
        NodeError::InvalidInput(rejection.body_text())
    }
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            NodeError::Store(err) => match err {
                SinkError::Transport(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("Store unreachable: {}", e)),
                SinkError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
                SinkError::Status { status, .. } if status == 400 => {
                    (StatusCode::BAD_REQUEST, "Query rejected by store".to_string())
                }
                other => {
                    tracing::error!(error = %other, "store request failed");
                    (StatusCode::BAD_GATEWAY, "Store request failed".to_string())
                }
            },
            NodeError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

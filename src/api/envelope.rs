//! Response envelope shared by every monitoring endpoint.
//!
//! Success: `{ "data": ..., "meta": { "timestamp", "version", "count"? } }`.
//! Failure: `{ "error": { "code", "message" }, "meta": { ... } }`. List
//! endpoints report `meta.count`; audit-store failures map to stable codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::storage::AuditError;

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
    /// Number of items, for list endpoints
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl ResponseMeta {
    fn now(count: Option<usize>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: "1",
            count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        (StatusCode::OK, axum::Json(Self { data, meta: ResponseMeta::now(None) })).into_response()
    }
}

impl<T: Serialize> ApiResponse<Vec<T>> {
    /// List payload with `meta.count` set.
    pub fn list(items: Vec<T>) -> Response {
        let meta = ResponseMeta::now(Some(items.len()));
        (StatusCode::OK, axum::Json(Self { data: items, meta })).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    fn build(status: StatusCode, code: &'static str, message: String) -> Response {
        let body = Self {
            error: ErrorDetail { code, message },
            meta: ResponseMeta::now(None),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::NOT_FOUND, "NOT_FOUND", msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.into())
    }

    /// Audit store unreachable (503, retryable) or holding unreadable
    /// records (500).
    pub fn audit(err: &AuditError) -> Response {
        warn!(error = %err, "Audit store query failed");
        match err {
            AuditError::Storage(_) => {
                Self::build(StatusCode::SERVICE_UNAVAILABLE, "AUDIT_UNAVAILABLE", err.to_string())
            }
            AuditError::Serialization(_) => {
                Self::build(StatusCode::INTERNAL_SERVER_ERROR, "AUDIT_CORRUPT", err.to_string())
            }
        }
    }
}

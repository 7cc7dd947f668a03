//! Response envelope mirroring a prior Python implementation's `get_json_ok_response`/
//! `get_json_error_response`: every response carries `Cache-Control`; success responses
//! add `X-Revision`, error responses add `X-Error-Code`.

use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;

use cf_protocol::ErrorCode;

pub struct JsonResponse;

impl JsonResponse {
    pub fn ok<T: Serialize>(body: &T, revision: Option<&str>, max_age: Duration) -> Response {
        let mut response = (StatusCode::OK, axum::Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert("Cache-Control", cache_control(Some(max_age)));
        if let Some(revision) = revision {
            if let Ok(value) = HeaderValue::from_str(revision) {
                headers.insert("X-Revision", value);
            }
        }
        response
    }

    pub fn error(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Response {
        let body = json!({ "error": message.into() });
        let mut response = (status, axum::Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert("Cache-Control", cache_control(None));
        headers.insert("X-Error-Code", HeaderValue::from_static(code.as_str()));
        response
    }

    /// A job is pending and no cached entry (success or error) exists yet.
    pub fn not_ready() -> Response {
        let status = StatusCode::from_u16(ErrorCode::ResponseNotReady.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::error(status, ErrorCode::ResponseNotReady, "the response is not ready yet")
    }

    /// Re-serves a cached error entry verbatim rather than recomputing.
    pub fn cached_error(code: ErrorCode, message: impl Into<String>) -> Response {
        let status = StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::error(status, code, message)
    }
}

fn cache_control(max_age: Option<Duration>) -> HeaderValue {
    match max_age {
        Some(duration) => HeaderValue::from_str(&format!("max-age={}", duration.as_secs()))
            .unwrap_or_else(|_| HeaderValue::from_static("no-store")),
        None => HeaderValue::from_static("no-store"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_sets_revision_and_cache_control() {
        let response = JsonResponse::ok(&json!({"valid": true}), Some("r1"), Duration::from_secs(120));
        assert_eq!(response.headers().get("X-Revision").unwrap(), "r1");
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "max-age=120");
    }

    #[test]
    fn error_response_sets_error_code_and_no_store() {
        let response = JsonResponse::error(StatusCode::NOT_FOUND, ErrorCode::DatasetNotFound, "nope");
        assert_eq!(response.headers().get("X-Error-Code").unwrap(), "DatasetNotFound");
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn not_ready_uses_response_not_ready_code() {
        let response = JsonResponse::not_ready();
        assert_eq!(response.headers().get("X-Error-Code").unwrap(), "ResponseNotReady");
    }
}

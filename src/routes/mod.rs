//! HTTP routes for Tether
//!
//! Handlers take already extracted request parts (query string, body bytes)
//! and always produce a response; errors become `{ error, code, retryable }`.

pub mod assignments;
pub mod health;
pub mod staff;

pub use assignments::{assign_staff_to_client, unassign_staff_from_client};
pub use health::{health_check, readiness_check, resolver_stats, version_info};
pub use staff::{legacy_staff_by_client, staff_for_client};

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::collections::HashMap;

use crate::types::{DataEnvelope, TetherError};

/// Error body shared by every route
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    pub retryable: bool,
}

impl From<&TetherError> for ErrorBody {
    fn from(err: &TetherError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code(),
            retryable: err.is_retryable(),
        }
    }
}

/// JSON response with CORS headers
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let (status, body) = match serde_json::to_vec(body) {
        Ok(body) => (status, body),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"error":"Serialization failed","code":"INTERNAL_ERROR","retryable":false}"#.to_vec(),
        ),
    };

    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

/// `200 { "data": ... }`
pub fn data_response<T: Serialize>(data: T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &DataEnvelope::new(data))
}

pub fn error_response(err: TetherError) -> Response<Full<Bytes>> {
    json_response(err.status_code(), &ErrorBody::from(&err))
}

/// CORS preflight response
pub fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, POST, OPTIONS"));
    response
}

/// Not found response
pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "code": "NOT_FOUND",
        "retryable": false,
        "path": path,
    });
    json_response(StatusCode::NOT_FOUND, &body)
}

/// Parse a query string into decoded key/value pairs
pub fn parse_query_params(query: &str) -> HashMap<String, String> {
    if query.is_empty() {
        return HashMap::new();
    }

    query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            let value = urlencoding::decode(value).map(|v| v.into_owned()).unwrap_or_default();
            Some((key.to_string(), value))
        })
        .collect()
}

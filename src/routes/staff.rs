//! Staff read routes
//!
//! - `GET /staff-for-client?clientId=` resolves via the index with scan fallback
//! - `GET /legacy-staff-by-client?clientId=` scans `Staff.clientIds` only

use bson::oid::ObjectId;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderValue;
use hyper::Response;

use super::{data_response, error_response, parse_query_params};
use crate::db::{parse_id, StaffRecord, StaffView};
use crate::server::AppState;
use crate::types::{Result, TetherError};

/// Header naming the read path that served a resolution
pub const RESOLUTION_PATH_HEADER: &str = "x-resolution-path";

pub async fn staff_for_client(state: &AppState, query: Option<&str>) -> Response<Full<Bytes>> {
    let client_id = match client_id_param(query) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.resolver.staff_for_client(&client_id).await {
        Ok(resolution) => {
            let mut response = data_response(views(&resolution.staff));
            response.headers_mut().insert(
                RESOLUTION_PATH_HEADER,
                HeaderValue::from_static(resolution.path.as_str()),
            );
            response
        }
        Err(e) => error_response(e),
    }
}

pub async fn legacy_staff_by_client(state: &AppState, query: Option<&str>) -> Response<Full<Bytes>> {
    let client_id = match client_id_param(query) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match state.resolver.legacy_staff_for_client(&client_id).await {
        Ok(staff) => data_response(views(&staff)),
        Err(e) => error_response(e),
    }
}

fn client_id_param(query: Option<&str>) -> Result<ObjectId> {
    let params = parse_query_params(query.unwrap_or(""));
    match params.get("clientId").map(|v| v.trim()) {
        Some(raw) if !raw.is_empty() => parse_id(raw),
        _ => Err(TetherError::BadRequest("clientId query parameter is required".into())),
    }
}

fn views(staff: &[StaffRecord]) -> Vec<StaffView> {
    staff.iter().map(StaffRecord::to_view).collect()
}

//! Assignment routes
//!
//! `POST /assign-staff-to-client` and `POST /unassign-staff-from-client`,
//! both with body `{ "staffId": hex, "clientId": hex }`.

use bson::oid::ObjectId;
use bytes::Bytes;
use http_body_util::Full;
use hyper::Response;
use serde::{Deserialize, Serialize};

use super::{data_response, error_response};
use crate::db::parse_id;
use crate::server::AppState;
use crate::types::{Result, TetherError};

/// Request body of both assignment routes
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    pub staff_id: String,
    pub client_id: String,
}

impl AssignmentRequest {
    fn parse(body: &[u8]) -> Result<(ObjectId, ObjectId)> {
        let request: AssignmentRequest = serde_json::from_slice(body)
            .map_err(|e| TetherError::BadRequest(format!("Invalid request body: {}", e)))?;
        Ok((parse_id(&request.staff_id)?, parse_id(&request.client_id)?))
    }
}

pub async fn assign_staff_to_client(state: &AppState, body: &Bytes) -> Response<Full<Bytes>> {
    let (staff_id, client_id) = match AssignmentRequest::parse(body) {
        Ok(ids) => ids,
        Err(e) => return error_response(e),
    };

    match state.assignments.assign_staff_to_client(&staff_id, &client_id).await {
        Ok(result) => data_response(result),
        Err(e) => error_response(e),
    }
}

pub async fn unassign_staff_from_client(state: &AppState, body: &Bytes) -> Response<Full<Bytes>> {
    let (staff_id, client_id) = match AssignmentRequest::parse(body) {
        Ok(ids) => ids,
        Err(e) => return error_response(e),
    };

    match state.assignments.unassign_staff_from_client(&staff_id, &client_id).await {
        Ok(result) => data_response(result),
        Err(e) => error_response(e),
    }
}

//! Typed client for the Tether HTTP API
//!
//! Successful responses must be exactly `{ "data": ... }`. Anything else,
//! including bare arrays and `{ staff: [...] }`, is a `Parse` error; the
//! client never guesses at alternative shapes.

use bson::oid::ObjectId;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::db::StaffView;
use crate::relations::{AssignmentResult, ResolutionPath, ResolutionStats};
use crate::routes::assignments::AssignmentRequest;
use crate::routes::staff::RESOLUTION_PATH_HEADER;
use crate::types::{DataEnvelope, Result, TetherError};

/// Error body returned by the server
#[derive(Deserialize, Debug)]
struct RemoteError {
    error: String,
    code: String,
}

/// Decode a `{ data }` envelope strictly
pub fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice::<DataEnvelope<T>>(body)
        .map(|envelope| envelope.data)
        .map_err(|e| TetherError::Parse(format!("Unexpected response shape: {}", e)))
}

/// Client for a running Tether server
#[derive(Clone)]
pub struct TetherClient {
    base_url: String,
    http: reqwest::Client,
}

impl TetherClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Staff assigned to a client, with the read path that served them
    pub async fn staff_for_client(&self, client_id: &ObjectId) -> Result<(Vec<StaffView>, ResolutionPath)> {
        let response = self
            .http
            .get(self.url("/staff-for-client"))
            .query(&[("clientId", client_id.to_hex())])
            .send()
            .await?;

        let path = response
            .headers()
            .get(RESOLUTION_PATH_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::parse::<ResolutionPath>)
            .transpose()?
            .ok_or_else(|| TetherError::Parse(format!("Missing {} header", RESOLUTION_PATH_HEADER)))?;

        let staff = self.decode(response, None).await?;
        Ok((staff, path))
    }

    /// Staff found by scanning `Staff.clientIds` only
    pub async fn legacy_staff_by_client(&self, client_id: &ObjectId) -> Result<Vec<StaffView>> {
        let response = self
            .http
            .get(self.url("/legacy-staff-by-client"))
            .query(&[("clientId", client_id.to_hex())])
            .send()
            .await?;
        self.decode(response, None).await
    }

    pub async fn assign(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<AssignmentResult> {
        self.post_assignment("/assign-staff-to-client", staff_id, client_id).await
    }

    pub async fn unassign(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<AssignmentResult> {
        self.post_assignment("/unassign-staff-from-client", staff_id, client_id).await
    }

    pub async fn stats(&self) -> Result<ResolutionStats> {
        let response = self.http.get(self.url("/stats")).send().await?;
        self.decode(response, None).await
    }

    async fn post_assignment(&self, path: &str, staff_id: &ObjectId, client_id: &ObjectId) -> Result<AssignmentResult> {
        let body = AssignmentRequest {
            staff_id: staff_id.to_hex(),
            client_id: client_id.to_hex(),
        };
        let response = self.http.post(self.url(path)).json(&body).send().await?;
        self.decode(response, Some((staff_id, client_id))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        pair: Option<(&ObjectId, &ObjectId)>,
    ) -> Result<T> {
        let status = response.status();
        let body = response.bytes().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "Tether response");

        if status.is_success() {
            parse_envelope(&body)
        } else {
            Err(remote_error(status, &body, pair))
        }
    }
}

/// Rebuild the server's error from its `{ error, code }` body
fn remote_error(status: StatusCode, body: &Bytes, pair: Option<(&ObjectId, &ObjectId)>) -> TetherError {
    let remote = match serde_json::from_slice::<RemoteError>(body) {
        Ok(remote) => remote,
        Err(_) => return TetherError::Http(format!("HTTP {}", status)),
    };

    match remote.code.as_str() {
        "BAD_REQUEST" => TetherError::BadRequest(remote.error),
        "CLIENT_NOT_FOUND" => TetherError::ClientNotFound(remote.error),
        "STAFF_NOT_FOUND" => TetherError::StaffNotFound(remote.error),
        "STORE_UNAVAILABLE" => TetherError::StoreUnavailable(remote.error),
        "STORE_TIMEOUT" => TetherError::StoreTimeout(remote.error),
        "PARTIAL_DUAL_WRITE" => match pair {
            Some((staff_id, client_id)) => TetherError::PartialDualWrite {
                staff_id: staff_id.to_hex(),
                client_id: client_id.to_hex(),
                reason: remote.error,
            },
            None => TetherError::Http(remote.error),
        },
        _ => TetherError::Http(format!("HTTP {}: {}", status, remote.error)),
    }
}

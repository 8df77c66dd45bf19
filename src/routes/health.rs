//! Health check endpoints
//!
//! Kubernetes-style probes:
//! - /health, /healthz - Liveness probe (is the service running?)
//! - /ready, /readyz - Readiness probe (can the store be reached?)
//!
//! Liveness never touches the store. Readiness pings it, bounded by the
//! slow-path timeout, and answers 503 when the ping fails.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::warn;

use super::{data_response, json_response};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Overall health status
    pub healthy: bool,
    /// 'online' or 'degraded'
    pub status: &'static str,
    pub version: &'static str,
    /// Seconds since the server state was built
    pub uptime: u64,
    /// Store backend name
    pub store: &'static str,
    /// Whether dual writes run in transactions
    pub transactions: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn build_health_response(state: &AppState, error: Option<String>) -> HealthResponse {
    HealthResponse {
        healthy: error.is_none(),
        status: if error.is_none() { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        store: state.store.backend(),
        transactions: state.store.supports_transactions(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        error,
    }
}

/// Handle liveness probe (/health, /healthz)
pub fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &build_health_response(state, None))
}

/// Handle readiness probe (/ready, /readyz)
pub async fn readiness_check(state: &AppState) -> Response<Full<Bytes>> {
    let limit = state.args.slow_timeout();
    let error = match tokio::time::timeout(limit, state.store.ping()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("Store ping exceeded {} ms", limit.as_millis())),
    };

    if let Some(ref e) = error {
        warn!(error = %e, "Readiness check failed");
    }

    let status = if error.is_none() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    json_response(status, &build_health_response(state, error))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    version: &'static str,
    commit: &'static str,
    build_time: &'static str,
    service: &'static str,
}

/// Version info for deployment verification
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "tether",
    };
    json_response(StatusCode::OK, &response)
}

/// Resolver statistics (/stats)
pub fn resolver_stats(state: &AppState) -> Response<Full<Bytes>> {
    data_response(state.resolver.get_stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerArgs;
    use crate::store::MemoryStore;
    use clap::Parser;
    use http_body_util::BodyExt;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_memory_store_is_ready() {
        let state = AppState::new(ServerArgs::parse_from(["tether"]), Arc::new(MemoryStore::new()));
        let response = readiness_check(&state).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["healthy"], true);
        assert_eq!(json["store"], "memory");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_stats_are_enveloped() {
        let state = AppState::new(ServerArgs::parse_from(["tether"]), Arc::new(MemoryStore::new()));
        let bytes = resolver_stats(&state).into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["data"]["resolutionCount"], 0);
    }
}

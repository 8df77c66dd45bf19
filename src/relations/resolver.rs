//! Staff-for-client resolution with index-first fallback
//!
//! ```text
//! Request → Client.staffs index (fast, batch lookup)
//!              ↓ empty
//!           Staff.clientIds scan (authoritative, slower)
//! ```
//!
//! An empty fast-path result cannot tell "this client has no staff" from
//! "the back-reference was never populated", so every empty fast result is
//! re-derived from the scan. The scan result is final, even when empty.
//! A fast-path *failure* is not masked by the scan; it propagates.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::db::StaffRecord;
use crate::store::RelationStore;
use crate::types::{Result, TetherError};

/// Which read path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    /// Served from `Client.staffs`
    Fast,
    /// Served from the `Staff.clientIds` scan
    Fallback,
}

impl ResolutionPath {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionPath::Fast => "fast",
            ResolutionPath::Fallback => "fallback",
        }
    }
}

impl FromStr for ResolutionPath {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fast" => Ok(ResolutionPath::Fast),
            "fallback" => Ok(ResolutionPath::Fallback),
            other => Err(TetherError::Parse(format!("Unknown resolution path: {}", other))),
        }
    }
}

/// Resolved staff with metadata
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Staff sorted by id
    pub staff: Vec<StaffRecord>,
    pub path: ResolutionPath,
    pub duration_ms: f64,
}

/// Per-path deadlines
#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    pub fast_timeout: Duration,
    pub slow_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            fast_timeout: Duration::from_millis(500),
            slow_timeout: Duration::from_secs(5),
        }
    }
}

/// Resolution statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionStats {
    /// Total resolution attempts (legacy scans included)
    pub resolution_count: u64,
    /// Non-empty fast-path results
    pub fast_hits: u64,
    /// Empty fast-path results re-derived from the scan
    pub fallbacks: u64,
    /// Fallbacks whose scan was also empty
    pub empty_fallbacks: u64,
    /// Direct legacy scans
    pub legacy_scans: u64,
    /// Timeouts and store errors
    pub failures: u64,
    /// Average resolution time in ms
    pub avg_resolution_ms: f64,
}

/// Staff resolver with fast-path/slow-path fallback
pub struct StaffResolver {
    store: Arc<dyn RelationStore>,
    config: ResolverConfig,
    stats: std::sync::RwLock<ResolutionStats>,
}

impl StaffResolver {
    pub fn new(store: Arc<dyn RelationStore>, config: ResolverConfig) -> Self {
        info!(
            backend = store.backend(),
            fast_timeout_ms = config.fast_timeout.as_millis() as u64,
            slow_timeout_ms = config.slow_timeout.as_millis() as u64,
            "StaffResolver initialized"
        );
        Self {
            store,
            config,
            stats: std::sync::RwLock::new(ResolutionStats::default()),
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve the staff assigned to a client.
    ///
    /// Tries the `Client.staffs` index first and falls back to the staff scan
    /// exactly once when the index yields nothing.
    pub async fn staff_for_client(&self, client_id: &ObjectId) -> Result<Resolution> {
        let start = Instant::now();
        let result = self.resolve_inner(client_id).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.update_stats(result.as_ref().map(|(staff, path)| (staff.len(), Some(*path))), duration_ms);

        result.map(|(staff, path)| Resolution {
            staff,
            path,
            duration_ms,
        })
    }

    /// Legacy resolution: the staff scan only
    pub async fn legacy_staff_for_client(&self, client_id: &ObjectId) -> Result<Vec<StaffRecord>> {
        let start = Instant::now();
        let result = self.slow_path(client_id).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        self.update_stats(result.as_ref().map(|staff| (staff.len(), None)), duration_ms);
        result
    }

    async fn resolve_inner(&self, client_id: &ObjectId) -> Result<(Vec<StaffRecord>, ResolutionPath)> {
        let fast = self.fast_path(client_id).await?;
        if !fast.is_empty() {
            debug!(client_id = %client_id, count = fast.len(), "Fast path hit");
            return Ok((fast, ResolutionPath::Fast));
        }

        debug!(client_id = %client_id, "Fast path empty, falling back to staff scan");
        let slow = self.slow_path(client_id).await?;
        if !slow.is_empty() {
            info!(
                client_id = %client_id,
                count = slow.len(),
                "Fallback found staff missing from Client.staffs"
            );
        }
        Ok((slow, ResolutionPath::Fallback))
    }

    async fn fast_path(&self, client_id: &ObjectId) -> Result<Vec<StaffRecord>> {
        let mut staff = with_timeout(
            self.config.fast_timeout,
            "fast path",
            self.index_lookup(client_id),
        )
        .await?;

        normalize(&mut staff);
        Ok(staff)
    }

    async fn index_lookup(&self, client_id: &ObjectId) -> Result<Vec<StaffRecord>> {
        let client = match self.store.find_client(client_id).await? {
            Some(client) => client,
            None => return Ok(Vec::new()),
        };
        if client.staff_ids().is_empty() {
            return Ok(Vec::new());
        }
        self.store.find_staff_by_ids(client.staff_ids()).await
    }

    async fn slow_path(&self, client_id: &ObjectId) -> Result<Vec<StaffRecord>> {
        let mut staff = with_timeout(
            self.config.slow_timeout,
            "slow path",
            self.store.staff_serving_client(client_id),
        )
        .await?;

        normalize(&mut staff);
        Ok(staff)
    }

    /// `outcome` is the result size and the path, `None` path for legacy scans
    fn update_stats(&self, outcome: std::result::Result<(usize, Option<ResolutionPath>), &TetherError>, duration_ms: f64) {
        if let Ok(mut stats) = self.stats.write() {
            stats.resolution_count += 1;

            match outcome {
                Ok((_, Some(ResolutionPath::Fast))) => stats.fast_hits += 1,
                Ok((count, Some(ResolutionPath::Fallback))) => {
                    stats.fallbacks += 1;
                    if count == 0 {
                        stats.empty_fallbacks += 1;
                    }
                }
                Ok((_, None)) => stats.legacy_scans += 1,
                Err(_) => stats.failures += 1,
            }

            // Update rolling average
            let n = stats.resolution_count as f64;
            stats.avg_resolution_ms = stats.avg_resolution_ms * ((n - 1.0) / n) + duration_ms / n;
        }
    }

    /// Get resolution statistics.
    pub fn get_stats(&self) -> ResolutionStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Reset statistics.
    pub fn reset_stats(&self) {
        if let Ok(mut stats) = self.stats.write() {
            *stats = ResolutionStats::default();
        }
    }
}

/// Sort by id so both paths yield identical arrays for identical sets
fn normalize(staff: &mut Vec<StaffRecord>) {
    staff.sort_by_key(|s| s.id);
    staff.dedup_by_key(|s| s.id);
}

async fn with_timeout<T>(
    limit: Duration,
    label: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TetherError::StoreTimeout(format!(
            "{} exceeded {} ms",
            label,
            limit.as_millis()
        ))),
    }
}

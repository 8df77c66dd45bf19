//! Read-only consistency audit
//!
//! Loads both sides of the relationship and reports every pair that breaks
//! `c ∈ s.clientIds ⟺ s ∈ c.staffs`. Never writes.

use bson::oid::ObjectId;
use futures::StreamExt;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{info, warn};

use crate::store::{RecordStream, RelationStore};
use crate::types::{Result, TetherError};

/// Kind of invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FindingKind {
    /// Client exists and is named by the staff, but lacks the back-reference
    MissingInverse,
    /// `Client.staffs` names a staff that does not list the client (or is gone)
    OrphanInverse,
    /// `Staff.clientIds` names a client that does not exist
    DanglingForward,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFinding {
    pub kind: FindingKind,
    pub staff_id: String,
    pub client_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub staff_scanned: u64,
    pub clients_scanned: u64,
    pub missing_inverse: u64,
    pub orphan_inverse: u64,
    pub dangling_forward: u64,
    /// Records skipped because they could not be decoded
    pub undecodable: u64,
    /// At most `sample_limit` findings
    pub samples: Vec<AuditFinding>,
}

impl AuditReport {
    /// Whether every existing edge is materialized on both sides
    pub fn is_consistent(&self) -> bool {
        self.missing_inverse == 0 && self.orphan_inverse == 0
    }

    fn record(&mut self, kind: FindingKind, staff_id: &ObjectId, client_id: &ObjectId, sample_limit: usize) {
        match kind {
            FindingKind::MissingInverse => self.missing_inverse += 1,
            FindingKind::OrphanInverse => self.orphan_inverse += 1,
            FindingKind::DanglingForward => self.dangling_forward += 1,
        }
        if self.samples.len() < sample_limit {
            self.samples.push(AuditFinding {
                kind,
                staff_id: staff_id.to_hex(),
                client_id: client_id.to_hex(),
            });
        }
    }
}

impl fmt::Display for AuditReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Consistency audit")?;
        writeln!(f, "  staff scanned:    {}", self.staff_scanned)?;
        writeln!(f, "  clients scanned:  {}", self.clients_scanned)?;
        writeln!(f, "  missing inverse:  {}", self.missing_inverse)?;
        writeln!(f, "  orphan inverse:   {}", self.orphan_inverse)?;
        writeln!(f, "  dangling forward: {}", self.dangling_forward)?;
        writeln!(f, "  undecodable:      {}", self.undecodable)?;
        for finding in &self.samples {
            writeln!(
                f,
                "    {:?} staff={} client={}",
                finding.kind, finding.staff_id, finding.client_id
            )?;
        }
        write!(
            f,
            "  result: {}",
            if self.is_consistent() { "consistent" } else { "inconsistent" }
        )
    }
}

/// Audit the whole relationship
pub async fn audit(store: &dyn RelationStore, sample_limit: usize) -> Result<AuditReport> {
    let mut report = AuditReport::default();

    let staff = drain(store.stream_staff().await?, "staff", &mut report.undecodable).await?;
    let clients = drain(store.stream_clients().await?, "client", &mut report.undecodable).await?;

    let forward: BTreeMap<ObjectId, BTreeSet<ObjectId>> = staff
        .into_iter()
        .map(|s| (s.id, s.client_ids.into_iter().collect()))
        .collect();
    let inverse: BTreeMap<ObjectId, BTreeSet<ObjectId>> = clients
        .into_iter()
        .map(|c| (c.id, c.staff_ids().iter().copied().collect()))
        .collect();

    report.staff_scanned = forward.len() as u64;
    report.clients_scanned = inverse.len() as u64;

    for (staff_id, client_ids) in &forward {
        for client_id in client_ids {
            match inverse.get(client_id) {
                None => report.record(FindingKind::DanglingForward, staff_id, client_id, sample_limit),
                Some(staffs) if !staffs.contains(staff_id) => {
                    report.record(FindingKind::MissingInverse, staff_id, client_id, sample_limit)
                }
                Some(_) => {}
            }
        }
    }

    for (client_id, staff_ids) in &inverse {
        for staff_id in staff_ids {
            let listed = forward
                .get(staff_id)
                .map(|clients| clients.contains(client_id))
                .unwrap_or(false);
            if !listed {
                report.record(FindingKind::OrphanInverse, staff_id, client_id, sample_limit);
            }
        }
    }

    info!(
        staff = report.staff_scanned,
        clients = report.clients_scanned,
        missing_inverse = report.missing_inverse,
        orphan_inverse = report.orphan_inverse,
        dangling_forward = report.dangling_forward,
        undecodable = report.undecodable,
        "Audit finished"
    );
    Ok(report)
}

/// Collect a record stream; undecodable records are counted and skipped
async fn drain<T>(mut records: RecordStream<T>, kind: &str, undecodable: &mut u64) -> Result<Vec<T>> {
    let mut out = Vec::new();
    while let Some(item) = records.next().await {
        match item {
            Ok(record) => out.push(record),
            Err(e @ TetherError::Parse(_)) => {
                warn!(kind, error = %e, "Skipping undecodable record");
                *undecodable += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

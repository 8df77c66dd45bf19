//! Relationship reconciler
//!
//! Projects every `Staff.clientIds` into the referenced `Client.staffs` with
//! atomic add-if-absent writes. Union-only: nothing is ever removed, so the
//! job is safe to re-run and a second run over synced data adds nothing.
//!
//! ## Failure policy
//!
//! Per-record problems (missing client, failed update) are recorded in the
//! summary and the run continues. Only losing the store itself (ping fails,
//! the cursor cannot be opened or dies mid-run) aborts with
//! `StoreUnavailable`.
//!
//! ## Forward repair
//!
//! With `repair_forward`, a second phase walks `Client.staffs` and adds any
//! missing client id to the referenced `Staff.clientIds`. That completes
//! assignments whose staff-side write never landed.

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{ClientRecord, StaffRecord};
use crate::store::{RelationStore, SetChange};
use crate::types::{Result, TetherError};

/// Why a (staff, client) pair could not be reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueReason {
    /// `Staff.clientIds` names a client that does not exist
    ClientNotFound,
    /// `Client.staffs` names a staff record that does not exist (forward repair)
    StaffNotFound,
    /// The lookup failed (dry run)
    LookupFailed,
    /// The atomic update failed
    UpdateFailed,
}

impl fmt::Display for IssueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueReason::ClientNotFound => "ClientNotFound",
            IssueReason::StaffNotFound => "StaffNotFound",
            IssueReason::LookupFailed => "LookupFailed",
            IssueReason::UpdateFailed => "UpdateFailed",
        };
        f.write_str(s)
    }
}

/// One recorded per-pair error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileIssue {
    pub staff_id: String,
    pub client_id: String,
    pub reason: IssueReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ReconcileIssue {
    fn new(staff_id: &ObjectId, client_id: &ObjectId, reason: IssueReason, detail: Option<String>) -> Self {
        Self {
            staff_id: staff_id.to_hex(),
            client_id: client_id.to_hex(),
            reason,
            detail,
        }
    }
}

/// Reconciler options
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Staff (or client) records processed concurrently
    pub concurrency: usize,
    /// Count would-be additions without writing
    pub dry_run: bool,
    /// Run the client-to-staff repair phase
    pub repair_forward: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            concurrency: 8,
            dry_run: false,
            repair_forward: false,
        }
    }
}

/// Structured result of one run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    /// Staff records read
    pub staff_total: u64,
    /// Staff with no `clientIds`, or undecodable
    pub staff_skipped: u64,
    /// Successful (staff, client) additions to `Client.staffs`
    pub clients_updated: u64,
    /// Client records read by forward repair
    pub clients_scanned: u64,
    /// Successful (client, staff) additions to `Staff.clientIds`
    pub staff_updated: u64,
    pub errors: Vec<ReconcileIssue>,
    /// Stopped early by cancellation; re-run to finish
    pub cancelled: bool,
}

impl ReconcileSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            dry_run,
            staff_total: 0,
            staff_skipped: 0,
            clients_updated: 0,
            clients_scanned: 0,
            staff_updated: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    /// Errors with the given reason
    pub fn count(&self, reason: IssueReason) -> usize {
        self.errors.iter().filter(|e| e.reason == reason).count()
    }
}

impl fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would be updated" } else { "updated" };
        writeln!(f, "Reconciliation run {}", self.run_id)?;
        writeln!(f, "  staff processed: {}", self.staff_total)?;
        writeln!(f, "  staff skipped:   {}", self.staff_skipped)?;
        writeln!(f, "  clients {}: {}", verb, self.clients_updated)?;
        if self.clients_scanned > 0 || self.staff_updated > 0 {
            writeln!(f, "  clients scanned: {}", self.clients_scanned)?;
            writeln!(f, "  staff {}:   {}", verb, self.staff_updated)?;
        }
        writeln!(f, "  errors:          {}", self.errors.len())?;
        for issue in &self.errors {
            write!(f, "    {} staff={} client={}", issue.reason, issue.staff_id, issue.client_id)?;
            match issue.detail {
                Some(ref detail) => writeln!(f, " ({})", detail)?,
                None => writeln!(f)?,
            }
        }
        if self.cancelled {
            writeln!(f, "  cancelled before completion; re-run to finish")?;
        }
        write!(f, "  duration: {} ms", self.duration_ms)
    }
}

/// Result of processing one record
#[derive(Debug, Default)]
struct RecordOutcome {
    skipped: bool,
    added: u64,
    issues: Vec<ReconcileIssue>,
}

impl RecordOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

/// Offline staff/client reconciler
pub struct Reconciler {
    store: Arc<dyn RelationStore>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RelationStore>, options: ReconcileOptions) -> Self {
        Self {
            store,
            options: ReconcileOptions {
                concurrency: options.concurrency.max(1),
                ..options
            },
        }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Run to completion, or until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<ReconcileSummary> {
        let clock = Instant::now();
        let mut summary = ReconcileSummary::new(Uuid::new_v4(), Utc::now(), self.options.dry_run);

        info!(
            run_id = %summary.run_id,
            backend = self.store.backend(),
            concurrency = self.options.concurrency,
            dry_run = self.options.dry_run,
            repair_forward = self.options.repair_forward,
            "Reconciliation started"
        );

        self.store.ping().await.map_err(unavailable)?;

        if let Err(e) = self.project_staff(&mut summary, &cancel).await {
            error!(
                run_id = %summary.run_id,
                staff_total = summary.staff_total,
                clients_updated = summary.clients_updated,
                error = %e,
                "Reconciliation aborted"
            );
            return Err(e);
        }

        if self.options.repair_forward && !cancel.is_cancelled() {
            if let Err(e) = self.repair_forward(&mut summary, &cancel).await {
                error!(
                    run_id = %summary.run_id,
                    clients_scanned = summary.clients_scanned,
                    staff_updated = summary.staff_updated,
                    error = %e,
                    "Forward repair aborted"
                );
                return Err(e);
            }
        }

        summary.cancelled = cancel.is_cancelled();
        summary.finished_at = Utc::now();
        summary.duration_ms = clock.elapsed().as_millis() as u64;

        info!(
            run_id = %summary.run_id,
            staff_total = summary.staff_total,
            staff_skipped = summary.staff_skipped,
            clients_updated = summary.clients_updated,
            staff_updated = summary.staff_updated,
            errors = summary.errors.len(),
            cancelled = summary.cancelled,
            duration_ms = summary.duration_ms,
            "Reconciliation finished"
        );
        Ok(summary)
    }

    /// Phase 1: Staff.clientIds → Client.staffs
    async fn project_staff(&self, summary: &mut ReconcileSummary, cancel: &CancellationToken) -> Result<()> {
        let staff = self.store.stream_staff().await.map_err(unavailable)?;

        let outcomes = staff
            .take_until(cancel.cancelled())
            .map(|item| async move {
                match item {
                    Ok(record) => Ok(self.project_one(record).await),
                    Err(e @ TetherError::Parse(_)) => {
                        warn!(error = %e, "Skipping undecodable staff record");
                        Ok(RecordOutcome::skipped())
                    }
                    Err(e) => Err(unavailable(e)),
                }
            })
            .buffer_unordered(self.options.concurrency);
        let mut outcomes = std::pin::pin!(outcomes);

        while let Some(outcome) = outcomes.next().await {
            let outcome = outcome?;
            summary.staff_total += 1;
            if outcome.skipped {
                summary.staff_skipped += 1;
            }
            summary.clients_updated += outcome.added;
            summary.errors.extend(outcome.issues);
        }
        Ok(())
    }

    async fn project_one(&self, staff: StaffRecord) -> RecordOutcome {
        if staff.client_ids.is_empty() {
            debug!(staff_id = %staff.id, "Staff has no clients");
            return RecordOutcome::skipped();
        }

        let mut outcome = RecordOutcome::default();
        for client_id in &staff.client_ids {
            let change = if self.options.dry_run {
                self.would_add_staff(client_id, &staff.id).await
            } else {
                self.store.add_staff_to_client(client_id, &staff.id).await
            };

            match change {
                Ok(SetChange::Changed) => {
                    debug!(staff_id = %staff.id, client_id = %client_id, "Added staff to client");
                    outcome.added += 1;
                }
                Ok(SetChange::Unchanged) => {}
                Ok(SetChange::Missing) => {
                    warn!(staff_id = %staff.id, client_id = %client_id, "Staff references missing client");
                    outcome.issues.push(ReconcileIssue::new(
                        &staff.id,
                        client_id,
                        IssueReason::ClientNotFound,
                        None,
                    ));
                }
                Err(e) => {
                    warn!(staff_id = %staff.id, client_id = %client_id, error = %e, "Client update failed");
                    outcome.issues.push(ReconcileIssue::new(
                        &staff.id,
                        client_id,
                        self.failure_reason(),
                        Some(e.to_string()),
                    ));
                }
            }
        }
        outcome
    }

    /// Phase 2: Client.staffs → Staff.clientIds
    async fn repair_forward(&self, summary: &mut ReconcileSummary, cancel: &CancellationToken) -> Result<()> {
        let clients = self.store.stream_clients().await.map_err(unavailable)?;

        let outcomes = clients
            .take_until(cancel.cancelled())
            .map(|item| async move {
                match item {
                    Ok(record) => Ok(self.repair_one(record).await),
                    Err(e @ TetherError::Parse(_)) => {
                        warn!(error = %e, "Skipping undecodable client record");
                        Ok(RecordOutcome::skipped())
                    }
                    Err(e) => Err(unavailable(e)),
                }
            })
            .buffer_unordered(self.options.concurrency);
        let mut outcomes = std::pin::pin!(outcomes);

        while let Some(outcome) = outcomes.next().await {
            let outcome = outcome?;
            summary.clients_scanned += 1;
            summary.staff_updated += outcome.added;
            summary.errors.extend(outcome.issues);
        }
        Ok(())
    }

    async fn repair_one(&self, client: ClientRecord) -> RecordOutcome {
        let mut outcome = RecordOutcome::default();
        for staff_id in client.staff_ids() {
            let change = if self.options.dry_run {
                self.would_add_client(staff_id, &client.id).await
            } else {
                self.store.add_client_to_staff(staff_id, &client.id).await
            };

            match change {
                Ok(SetChange::Changed) => {
                    info!(staff_id = %staff_id, client_id = %client.id, "Completed forward edge");
                    outcome.added += 1;
                }
                Ok(SetChange::Unchanged) => {}
                Ok(SetChange::Missing) => {
                    warn!(staff_id = %staff_id, client_id = %client.id, "Client references missing staff");
                    outcome.issues.push(ReconcileIssue::new(
                        staff_id,
                        &client.id,
                        IssueReason::StaffNotFound,
                        None,
                    ));
                }
                Err(e) => {
                    warn!(staff_id = %staff_id, client_id = %client.id, error = %e, "Staff update failed");
                    outcome.issues.push(ReconcileIssue::new(
                        staff_id,
                        &client.id,
                        self.failure_reason(),
                        Some(e.to_string()),
                    ));
                }
            }
        }
        outcome
    }

    /// Dry-run stand-in for `add_staff_to_client`
    async fn would_add_staff(&self, client_id: &ObjectId, staff_id: &ObjectId) -> Result<SetChange> {
        Ok(match self.store.find_client(client_id).await? {
            None => SetChange::Missing,
            Some(client) if client.has_staff(staff_id) => SetChange::Unchanged,
            Some(_) => SetChange::Changed,
        })
    }

    /// Dry-run stand-in for `add_client_to_staff`
    async fn would_add_client(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<SetChange> {
        Ok(match self.store.find_staff(staff_id).await? {
            None => SetChange::Missing,
            Some(staff) if staff.serves(client_id) => SetChange::Unchanged,
            Some(_) => SetChange::Changed,
        })
    }

    fn failure_reason(&self) -> IssueReason {
        if self.options.dry_run {
            IssueReason::LookupFailed
        } else {
            IssueReason::UpdateFailed
        }
    }
}

/// Top-level store failures always abort the run
fn unavailable(err: TetherError) -> TetherError {
    match err {
        TetherError::StoreUnavailable(_) => err,
        other => TetherError::StoreUnavailable(other.to_string()),
    }
}

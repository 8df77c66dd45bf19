//! Dual-write assignment path
//!
//! Both sides of an assignment change together. With transactions the two
//! `$addToSet`/`$pull` writes commit atomically. Without them the client side
//! is written first and the staff side is the linearization point: a failure
//! between the writes leaves only the inverse edge, reported as
//! `PartialDualWrite`. Re-issuing the call or running the reconciler with
//! forward repair completes it.

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::{DualChange, RelationStore, SetChange};
use crate::types::{Result, TetherError};

/// Outcome of an assignment or unassignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResult {
    pub staff_id: String,
    pub client_id: String,
    /// Whether `Staff.clientIds` changed
    pub staff_updated: bool,
    /// Whether `Client.staffs` changed
    pub client_updated: bool,
    /// Whether both writes ran in one transaction
    pub transactional: bool,
}

impl AssignmentResult {
    fn from_change(staff_id: &ObjectId, client_id: &ObjectId, change: DualChange, transactional: bool) -> Self {
        Self {
            staff_id: staff_id.to_hex(),
            client_id: client_id.to_hex(),
            staff_updated: change.staff.changed(),
            client_updated: change.client.changed(),
            transactional,
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Assign,
    Unassign,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::Assign => "assign",
            Direction::Unassign => "unassign",
        }
    }
}

/// Assignment service over a relation store
#[derive(Clone)]
pub struct Assignments {
    store: Arc<dyn RelationStore>,
}

impl Assignments {
    pub fn new(store: Arc<dyn RelationStore>) -> Self {
        Self { store }
    }

    /// Assign a staff member to a client, updating both sides
    pub async fn assign_staff_to_client(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<AssignmentResult> {
        self.apply(Direction::Assign, staff_id, client_id).await
    }

    /// Remove an assignment from both sides
    pub async fn unassign_staff_from_client(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<AssignmentResult> {
        self.apply(Direction::Unassign, staff_id, client_id).await
    }

    async fn apply(&self, direction: Direction, staff_id: &ObjectId, client_id: &ObjectId) -> Result<AssignmentResult> {
        let result = if self.store.supports_transactions() {
            let change = match direction {
                Direction::Assign => self.store.assign_in_transaction(staff_id, client_id).await?,
                Direction::Unassign => self.store.unassign_in_transaction(staff_id, client_id).await?,
            };
            AssignmentResult::from_change(staff_id, client_id, change, true)
        } else {
            let change = self.ordered(direction, staff_id, client_id).await?;
            AssignmentResult::from_change(staff_id, client_id, change, false)
        };

        info!(
            op = direction.as_str(),
            staff_id = %staff_id,
            client_id = %client_id,
            staff_updated = result.staff_updated,
            client_updated = result.client_updated,
            transactional = result.transactional,
            "Assignment applied"
        );
        Ok(result)
    }

    /// Client side first, staff side second
    async fn ordered(&self, direction: Direction, staff_id: &ObjectId, client_id: &ObjectId) -> Result<DualChange> {
        if self.store.find_staff(staff_id).await?.is_none() {
            return Err(TetherError::StaffNotFound(staff_id.to_hex()));
        }

        let client = match direction {
            Direction::Assign => self.store.add_staff_to_client(client_id, staff_id).await?,
            Direction::Unassign => self.store.remove_staff_from_client(client_id, staff_id).await?,
        };
        if client == SetChange::Missing {
            return Err(TetherError::ClientNotFound(client_id.to_hex()));
        }

        let staff = match direction {
            Direction::Assign => self.store.add_client_to_staff(staff_id, client_id).await,
            Direction::Unassign => self.store.remove_client_from_staff(staff_id, client_id).await,
        };

        match staff {
            Ok(SetChange::Missing) => Err(self.partial(direction, staff_id, client_id, "staff record disappeared".into())),
            Ok(staff) => Ok(DualChange { staff, client }),
            Err(e) => Err(self.partial(direction, staff_id, client_id, e.to_string())),
        }
    }

    fn partial(&self, direction: Direction, staff_id: &ObjectId, client_id: &ObjectId, reason: String) -> TetherError {
        warn!(
            op = direction.as_str(),
            staff_id = %staff_id,
            client_id = %client_id,
            reason = %reason,
            "Client side written but staff side failed; re-run the request or the reconciler"
        );
        TetherError::PartialDualWrite {
            staff_id: staff_id.to_hex(),
            client_id: client_id.to_hex(),
            reason,
        }
    }
}

//! Relation store abstraction
//!
//! Everything Tether does to the staff and client collections goes through
//! `RelationStore`. Set mutations are single-document atomic operations
//! (add-if-absent / pull), never read-modify-write in the application.

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use bson::oid::ObjectId;
use futures::stream::BoxStream;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::config::{StoreArgs, StoreBackend};
use crate::db::{ClientRecord, MongoClient, StaffRecord};
use crate::types::{Result, TetherError};

/// Stream of decoded records; an `Err` item is a decode or cursor failure
pub type RecordStream<T> = BoxStream<'static, Result<T>>;

/// Effect of an atomic set operation on one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetChange {
    /// The set was modified
    Changed,
    /// The document matched but already had (or lacked) the entry
    Unchanged,
    /// No document with that id
    Missing,
}

impl SetChange {
    pub fn changed(self) -> bool {
        matches!(self, SetChange::Changed)
    }
}

/// Outcome of a transactional dual write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DualChange {
    pub staff: SetChange,
    pub client: SetChange,
}

/// Storage operations used by the reconciler, resolver and assignment path
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;

    /// Verify the store is reachable
    async fn ping(&self) -> Result<()>;

    async fn find_client(&self, client_id: &ObjectId) -> Result<Option<ClientRecord>>;

    async fn find_staff(&self, staff_id: &ObjectId) -> Result<Option<StaffRecord>>;

    /// Batch lookup by id; unknown ids are silently absent from the result
    async fn find_staff_by_ids(&self, staff_ids: &[ObjectId]) -> Result<Vec<StaffRecord>>;

    /// Scan the staff collection for records whose `clientIds` contain `client_id`
    async fn staff_serving_client(&self, client_id: &ObjectId) -> Result<Vec<StaffRecord>>;

    /// Stream every staff record
    async fn stream_staff(&self) -> Result<RecordStream<StaffRecord>>;

    /// Stream every client record
    async fn stream_clients(&self) -> Result<RecordStream<ClientRecord>>;

    /// Atomically add `staff_id` to `Client.staffs` if absent
    async fn add_staff_to_client(&self, client_id: &ObjectId, staff_id: &ObjectId) -> Result<SetChange>;

    /// Atomically add `client_id` to `Staff.clientIds` if absent
    async fn add_client_to_staff(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<SetChange>;

    /// Atomically remove `staff_id` from `Client.staffs`
    async fn remove_staff_from_client(&self, client_id: &ObjectId, staff_id: &ObjectId) -> Result<SetChange>;

    /// Atomically remove `client_id` from `Staff.clientIds`
    async fn remove_client_from_staff(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<SetChange>;

    /// Whether `assign_in_transaction` / `unassign_in_transaction` can be used
    fn supports_transactions(&self) -> bool {
        false
    }

    /// Write both sides of an assignment in one transaction.
    ///
    /// Nothing is written unless both documents exist.
    async fn assign_in_transaction(&self, _staff_id: &ObjectId, _client_id: &ObjectId) -> Result<DualChange> {
        Err(TetherError::Config(format!(
            "{} store does not support transactions",
            self.backend()
        )))
    }

    /// Remove both sides of an assignment in one transaction
    async fn unassign_in_transaction(&self, _staff_id: &ObjectId, _client_id: &ObjectId) -> Result<DualChange> {
        Err(TetherError::Config(format!(
            "{} store does not support transactions",
            self.backend()
        )))
    }
}

/// Open the configured store
pub async fn open(args: &StoreArgs) -> Result<Arc<dyn RelationStore>> {
    match args.store {
        StoreBackend::Mongo => {
            let mongo = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
            let store = MongoStore::new(
                mongo,
                &args.staff_collection,
                &args.client_collection,
                args.use_transactions,
            )
            .await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            info!("Using in-memory store (data is lost on exit)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

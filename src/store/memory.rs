//! In-memory implementation of `RelationStore`
//!
//! Used for development (`--store memory`) and tests. Each set mutation runs
//! under a single write guard, which gives the same per-document atomicity
//! as `$addToSet` / `$pull`.

use async_trait::async_trait;
use bson::oid::ObjectId;
use futures::StreamExt;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::db::{ClientRecord, StaffRecord};
use crate::store::{DualChange, RecordStream, RelationStore, SetChange};
use crate::types::{Result, TetherError};

#[derive(Default)]
struct MemoryState {
    staff: BTreeMap<ObjectId, StaffRecord>,
    clients: BTreeMap<ObjectId, ClientRecord>,
}

/// Process-local relation store
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    transactions: bool,
}

impl MemoryStore {
    /// Store without transaction support (dual writes take the ordered path)
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose dual writes run under one lock, like a transaction
    pub fn transactional() -> Self {
        Self {
            state: RwLock::default(),
            transactions: true,
        }
    }

    pub async fn insert_staff(&self, staff: StaffRecord) {
        self.state.write().await.staff.insert(staff.id, staff);
    }

    pub async fn insert_client(&self, client: ClientRecord) {
        self.state.write().await.clients.insert(client.id, client);
    }

    /// Snapshot of one client
    pub async fn client(&self, id: &ObjectId) -> Option<ClientRecord> {
        self.state.read().await.clients.get(id).cloned()
    }

    /// Snapshot of one staff record
    pub async fn staff(&self, id: &ObjectId) -> Option<StaffRecord> {
        self.state.read().await.staff.get(id).cloned()
    }

    pub async fn client_count(&self) -> usize {
        self.state.read().await.clients.len()
    }
}

fn add_to(set: &mut Vec<ObjectId>, id: ObjectId) -> SetChange {
    if set.contains(&id) {
        SetChange::Unchanged
    } else {
        set.push(id);
        SetChange::Changed
    }
}

fn pull_from(set: &mut Vec<ObjectId>, id: &ObjectId) -> SetChange {
    let before = set.len();
    set.retain(|existing| existing != id);
    if set.len() == before {
        SetChange::Unchanged
    } else {
        SetChange::Changed
    }
}

impl MemoryState {
    fn add_staff_to_client(&mut self, client_id: &ObjectId, staff_id: &ObjectId) -> SetChange {
        match self.clients.get_mut(client_id) {
            Some(client) => add_to(client.staffs.get_or_insert_with(Vec::new), *staff_id),
            None => SetChange::Missing,
        }
    }

    fn add_client_to_staff(&mut self, staff_id: &ObjectId, client_id: &ObjectId) -> SetChange {
        match self.staff.get_mut(staff_id) {
            Some(staff) => add_to(&mut staff.client_ids, *client_id),
            None => SetChange::Missing,
        }
    }

    fn remove_staff_from_client(&mut self, client_id: &ObjectId, staff_id: &ObjectId) -> SetChange {
        match self.clients.get_mut(client_id) {
            Some(client) => match client.staffs.as_mut() {
                Some(staffs) => pull_from(staffs, staff_id),
                None => SetChange::Unchanged,
            },
            None => SetChange::Missing,
        }
    }

    fn remove_client_from_staff(&mut self, staff_id: &ObjectId, client_id: &ObjectId) -> SetChange {
        match self.staff.get_mut(staff_id) {
            Some(staff) => pull_from(&mut staff.client_ids, client_id),
            None => SetChange::Missing,
        }
    }

    fn require_pair(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<()> {
        if !self.clients.contains_key(client_id) {
            return Err(TetherError::ClientNotFound(client_id.to_hex()));
        }
        if !self.staff.contains_key(staff_id) {
            return Err(TetherError::StaffNotFound(staff_id.to_hex()));
        }
        Ok(())
    }
}

#[async_trait]
impl RelationStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_client(&self, client_id: &ObjectId) -> Result<Option<ClientRecord>> {
        Ok(self.client(client_id).await)
    }

    async fn find_staff(&self, staff_id: &ObjectId) -> Result<Option<StaffRecord>> {
        Ok(self.staff(staff_id).await)
    }

    async fn find_staff_by_ids(&self, staff_ids: &[ObjectId]) -> Result<Vec<StaffRecord>> {
        let state = self.state.read().await;
        let mut found: Vec<StaffRecord> = staff_ids
            .iter()
            .filter_map(|id| state.staff.get(id).cloned())
            .collect();
        found.sort_by_key(|s| s.id);
        found.dedup_by_key(|s| s.id);
        Ok(found)
    }

    async fn staff_serving_client(&self, client_id: &ObjectId) -> Result<Vec<StaffRecord>> {
        let state = self.state.read().await;
        Ok(state
            .staff
            .values()
            .filter(|s| s.serves(client_id))
            .cloned()
            .collect())
    }

    async fn stream_staff(&self) -> Result<RecordStream<StaffRecord>> {
        let snapshot: Vec<StaffRecord> = self.state.read().await.staff.values().cloned().collect();
        Ok(futures::stream::iter(snapshot.into_iter().map(Ok)).boxed())
    }

    async fn stream_clients(&self) -> Result<RecordStream<ClientRecord>> {
        let snapshot: Vec<ClientRecord> = self.state.read().await.clients.values().cloned().collect();
        Ok(futures::stream::iter(snapshot.into_iter().map(Ok)).boxed())
    }

    async fn add_staff_to_client(&self, client_id: &ObjectId, staff_id: &ObjectId) -> Result<SetChange> {
        Ok(self.state.write().await.add_staff_to_client(client_id, staff_id))
    }

    async fn add_client_to_staff(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<SetChange> {
        Ok(self.state.write().await.add_client_to_staff(staff_id, client_id))
    }

    async fn remove_staff_from_client(&self, client_id: &ObjectId, staff_id: &ObjectId) -> Result<SetChange> {
        Ok(self.state.write().await.remove_staff_from_client(client_id, staff_id))
    }

    async fn remove_client_from_staff(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<SetChange> {
        Ok(self.state.write().await.remove_client_from_staff(staff_id, client_id))
    }

    fn supports_transactions(&self) -> bool {
        self.transactions
    }

    async fn assign_in_transaction(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<DualChange> {
        let mut state = self.state.write().await;
        state.require_pair(staff_id, client_id)?;
        let client = state.add_staff_to_client(client_id, staff_id);
        let staff = state.add_client_to_staff(staff_id, client_id);
        Ok(DualChange { staff, client })
    }

    async fn unassign_in_transaction(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<DualChange> {
        let mut state = self.state.write().await;
        state.require_pair(staff_id, client_id)?;
        let client = state.remove_staff_from_client(client_id, staff_id);
        let staff = state.remove_client_from_staff(staff_id, client_id);
        Ok(DualChange { staff, client })
    }
}

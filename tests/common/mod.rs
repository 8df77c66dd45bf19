//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bson::oid::ObjectId;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use tether::db::{ClientRecord, StaffRecord};
use tether::store::{RecordStream, RelationStore, SetChange};
use tether::{MemoryStore, Result, TetherError};

/// `MemoryStore` with switchable faults
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Ping and every read fail with `StoreUnavailable`
    pub down: AtomicBool,
    /// Writes to `Client.staffs` fail
    pub fail_client_writes: AtomicBool,
    /// Writes to `Staff.clientIds` fail
    pub fail_staff_writes: AtomicBool,
    /// Delay applied to `find_client`
    pub client_read_delay_ms: AtomicU64,
    /// Delay applied to `staff_serving_client`
    pub scan_delay_ms: AtomicU64,
    /// The staff stream errors after this many records (0 = never)
    pub stream_dies_after: AtomicUsize,
    /// Error the staff stream ends with; `StoreUnavailable` when unset
    stream_failure: Mutex<Option<fn() -> TetherError>>,
    /// Calls to `add_staff_to_client` that reached the inner store
    client_writes: AtomicUsize,
    cancel_at: Mutex<Option<(usize, CancellationToken)>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(flag: &AtomicBool, on: bool) {
        flag.store(on, Ordering::SeqCst);
    }

    /// End the staff stream with `failure()` after `after` records
    pub fn fail_stream_with(&self, after: usize, failure: fn() -> TetherError) {
        *self.stream_failure.lock().unwrap() = Some(failure);
        self.stream_dies_after.store(after, Ordering::SeqCst);
    }

    /// Cancel `token` once `writes` client writes have landed
    pub fn cancel_after_writes(&self, writes: usize, token: CancellationToken) {
        *self.cancel_at.lock().unwrap() = Some((writes, token));
    }

    async fn delay(ms: &AtomicU64) {
        let ms = ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn check_up(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(TetherError::StoreUnavailable("injected outage".into()))
        } else {
            Ok(())
        }
    }

    fn check_write(flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(TetherError::Database("injected write failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RelationStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn ping(&self) -> Result<()> {
        self.check_up()
    }

    async fn find_client(&self, client_id: &ObjectId) -> Result<Option<ClientRecord>> {
        Self::delay(&self.client_read_delay_ms).await;
        self.check_up()?;
        self.inner.find_client(client_id).await
    }

    async fn find_staff(&self, staff_id: &ObjectId) -> Result<Option<StaffRecord>> {
        self.check_up()?;
        self.inner.find_staff(staff_id).await
    }

    async fn find_staff_by_ids(&self, staff_ids: &[ObjectId]) -> Result<Vec<StaffRecord>> {
        self.check_up()?;
        self.inner.find_staff_by_ids(staff_ids).await
    }

    async fn staff_serving_client(&self, client_id: &ObjectId) -> Result<Vec<StaffRecord>> {
        Self::delay(&self.scan_delay_ms).await;
        self.check_up()?;
        self.inner.staff_serving_client(client_id).await
    }

    async fn stream_staff(&self) -> Result<RecordStream<StaffRecord>> {
        self.check_up()?;
        let stream = self.inner.stream_staff().await?;
        let dies_after = self.stream_dies_after.load(Ordering::SeqCst);
        if dies_after == 0 {
            return Ok(stream);
        }

        let make = self.stream_failure.lock().unwrap().unwrap_or(cursor_lost);
        let failure = futures::stream::once(async move { Err(make()) });
        Ok(stream.take(dies_after).chain(failure).boxed())
    }

    async fn stream_clients(&self) -> Result<RecordStream<ClientRecord>> {
        self.check_up()?;
        self.inner.stream_clients().await
    }

    async fn add_staff_to_client(&self, client_id: &ObjectId, staff_id: &ObjectId) -> Result<SetChange> {
        Self::check_write(&self.fail_client_writes)?;
        let change = self.inner.add_staff_to_client(client_id, staff_id).await?;
        let written = self.client_writes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = self.cancel_at.lock().unwrap().as_ref() {
            if written >= *at {
                token.cancel();
            }
        }
        Ok(change)
    }

    async fn add_client_to_staff(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<SetChange> {
        Self::check_write(&self.fail_staff_writes)?;
        self.inner.add_client_to_staff(staff_id, client_id).await
    }

    async fn remove_staff_from_client(&self, client_id: &ObjectId, staff_id: &ObjectId) -> Result<SetChange> {
        Self::check_write(&self.fail_client_writes)?;
        self.inner.remove_staff_from_client(client_id, staff_id).await
    }

    async fn remove_client_from_staff(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<SetChange> {
        Self::check_write(&self.fail_staff_writes)?;
        self.inner.remove_client_from_staff(staff_id, client_id).await
    }
}

fn cursor_lost() -> TetherError {
    TetherError::StoreUnavailable("cursor lost".into())
}

/// A → {X}, B → {X, Y}; X has no `staffs`, Y already lists B
pub struct Abxy {
    pub a: ObjectId,
    pub b: ObjectId,
    pub x: ObjectId,
    pub y: ObjectId,
}

pub async fn seed_abxy(store: &MemoryStore) -> Abxy {
    let ids = Abxy {
        a: ObjectId::new(),
        b: ObjectId::new(),
        x: ObjectId::new(),
        y: ObjectId::new(),
    };
    store.insert_staff(StaffRecord::new(ids.a).with_clients([ids.x])).await;
    store.insert_staff(StaffRecord::new(ids.b).with_clients([ids.x, ids.y])).await;
    store.insert_client(ClientRecord::new(ids.x)).await;
    store.insert_client(ClientRecord::new(ids.y).with_staffs([ids.b])).await;
    ids
}

/// Sorted copy of a client's `staffs`
pub async fn staffs_of(store: &MemoryStore, client_id: &ObjectId) -> Vec<ObjectId> {
    let mut staffs = store
        .client(client_id)
        .await
        .map(|c| c.staff_ids().to_vec())
        .unwrap_or_default();
    staffs.sort();
    staffs
}

//! MongoDB implementation of `RelationStore`
//!
//! Set mutations use `$addToSet` / `$pull` so concurrent writers to the same
//! client document commute. Every filter matches ids in both their native
//! and legacy hex-string forms.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson, Document};
use futures::{StreamExt, TryStreamExt};
use mongodb::{results::UpdateResult, ClientSession, Collection};
use tracing::{debug, info, warn};

use crate::db::schemas::{CLIENT_IDS_FIELD, STAFFS_FIELD};
use crate::db::{ClientRecord, MongoClient, StaffRecord};
use crate::store::{DualChange, RecordStream, RelationStore, SetChange};
use crate::types::{Result, TetherError};

/// MongoDB-backed relation store
pub struct MongoStore {
    mongo: MongoClient,
    staff: Collection<Document>,
    clients: Collection<Document>,
    use_transactions: bool,
}

impl MongoStore {
    /// Bind the staff and client collections and apply their indexes
    pub async fn new(
        mongo: MongoClient,
        staff_collection: &str,
        client_collection: &str,
        use_transactions: bool,
    ) -> Result<Self> {
        let staff = mongo
            .indexed_collection::<StaffRecord>(staff_collection)
            .await?;
        let clients = mongo
            .indexed_collection::<ClientRecord>(client_collection)
            .await?;

        info!(
            db = mongo.db_name(),
            staff = staff_collection,
            clients = client_collection,
            transactions = use_transactions,
            "MongoStore ready"
        );

        Ok(Self {
            mongo,
            staff,
            clients,
            use_transactions,
        })
    }

    async fn collect_staff(&self, filter: Document) -> Result<Vec<StaffRecord>> {
        let docs: Vec<Document> = self
            .staff
            .find(filter)
            .sort(doc! { "_id": 1 })
            .await?
            .try_collect()
            .await?;

        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            match StaffRecord::from_document(doc) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping undecodable staff document"),
            }
        }
        Ok(records)
    }

    async fn assign_with_session(
        &self,
        session: &mut ClientSession,
        staff_id: &ObjectId,
        client_id: &ObjectId,
    ) -> Result<DualChange> {
        let client = add_member(&self.clients, client_id, STAFFS_FIELD, staff_id, Some(&mut *session)).await?;
        if client == SetChange::Missing {
            return Err(TetherError::ClientNotFound(client_id.to_hex()));
        }

        let staff = add_member(&self.staff, staff_id, CLIENT_IDS_FIELD, client_id, Some(&mut *session)).await?;
        if staff == SetChange::Missing {
            return Err(TetherError::StaffNotFound(staff_id.to_hex()));
        }

        Ok(DualChange { staff, client })
    }

    async fn unassign_with_session(
        &self,
        session: &mut ClientSession,
        staff_id: &ObjectId,
        client_id: &ObjectId,
    ) -> Result<DualChange> {
        let client = remove_member(&self.clients, client_id, STAFFS_FIELD, staff_id, Some(&mut *session)).await?;
        if client == SetChange::Missing {
            return Err(TetherError::ClientNotFound(client_id.to_hex()));
        }

        let staff = remove_member(&self.staff, staff_id, CLIENT_IDS_FIELD, client_id, Some(&mut *session)).await?;
        if staff == SetChange::Missing {
            return Err(TetherError::StaffNotFound(staff_id.to_hex()));
        }

        Ok(DualChange { staff, client })
    }

    async fn finish_transaction(
        &self,
        mut session: ClientSession,
        result: Result<DualChange>,
    ) -> Result<DualChange> {
        match result {
            Ok(change) => {
                session.commit_transaction().await?;
                Ok(change)
            }
            Err(e) => {
                if let Err(abort_err) = session.abort_transaction().await {
                    warn!(error = %abort_err, "Failed to abort transaction");
                }
                Err(e)
            }
        }
    }
}

/// Add `member` to the id array `field` unless any form of it is present.
///
/// The `$nin` guard keeps a legacy hex-string entry from gaining an
/// ObjectId twin. When nothing was modified, an existence check tells a
/// missing document apart from one that already holds the entry.
async fn add_member(
    coll: &Collection<Document>,
    id: &ObjectId,
    field: &str,
    member: &ObjectId,
    mut session: Option<&mut ClientSession>,
) -> Result<SetChange> {
    let update = coll.update_one(add_filter(id, field, member), doc! { "$addToSet": { field: *member } });
    let result = match session.as_deref_mut() {
        Some(s) => update.session(s).await?,
        None => update.await?,
    };
    if result.modified_count > 0 {
        return Ok(SetChange::Changed);
    }

    let count = coll.count_documents(id_filter(id));
    let found = match session {
        Some(s) => count.session(s).await?,
        None => count.await?,
    };
    Ok(if found == 0 { SetChange::Missing } else { SetChange::Unchanged })
}

/// Pull every form of `member` out of the id array `field`
async fn remove_member(
    coll: &Collection<Document>,
    id: &ObjectId,
    field: &str,
    member: &ObjectId,
    session: Option<&mut ClientSession>,
) -> Result<SetChange> {
    let update = coll.update_one(id_filter(id), doc! { "$pull": { field: { "$in": id_variants(member) } } });
    let result = match session {
        Some(s) => update.session(s).await?,
        None => update.await?,
    };
    Ok(set_change(&result))
}

fn set_change(result: &UpdateResult) -> SetChange {
    if result.matched_count == 0 {
        SetChange::Missing
    } else if result.modified_count == 0 {
        SetChange::Unchanged
    } else {
        SetChange::Changed
    }
}

/// Match both native ids and legacy hex strings
fn id_variants(id: &ObjectId) -> Bson {
    all_variants(std::slice::from_ref(id))
}

fn all_variants(ids: &[ObjectId]) -> Bson {
    Bson::Array(
        ids.iter()
            .flat_map(|id| [Bson::ObjectId(*id), Bson::String(id.to_hex())])
            .collect(),
    )
}

/// Select a document by its `_id`, whichever form it was stored in
fn id_filter(id: &ObjectId) -> Document {
    doc! { "_id": { "$in": id_variants(id) } }
}

fn add_filter(id: &ObjectId, field: &str, member: &ObjectId) -> Document {
    let mut filter = id_filter(id);
    filter.insert(field, doc! { "$nin": id_variants(member) });
    filter
}

/// Cursor failures end the scan early, so they surface as an outage.
/// Decode failures stay `Parse` and only cost the one record.
fn cursor_failure(err: TetherError) -> TetherError {
    match err {
        TetherError::Parse(_) | TetherError::StoreUnavailable(_) => err,
        other => TetherError::StoreUnavailable(format!("Cursor failed: {}", other)),
    }
}

#[async_trait]
impl RelationStore for MongoStore {
    fn backend(&self) -> &'static str {
        "mongo"
    }

    async fn ping(&self) -> Result<()> {
        self.mongo.ping().await
    }

    async fn find_client(&self, client_id: &ObjectId) -> Result<Option<ClientRecord>> {
        self.clients
            .find_one(id_filter(client_id))
            .await?
            .map(ClientRecord::from_document)
            .transpose()
    }

    async fn find_staff(&self, staff_id: &ObjectId) -> Result<Option<StaffRecord>> {
        self.staff
            .find_one(id_filter(staff_id))
            .await?
            .map(StaffRecord::from_document)
            .transpose()
    }

    async fn find_staff_by_ids(&self, staff_ids: &[ObjectId]) -> Result<Vec<StaffRecord>> {
        if staff_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.collect_staff(doc! { "_id": { "$in": all_variants(staff_ids) } })
            .await
    }

    async fn staff_serving_client(&self, client_id: &ObjectId) -> Result<Vec<StaffRecord>> {
        debug!(client_id = %client_id, "Scanning staff collection");
        let records = self
            .collect_staff(doc! { CLIENT_IDS_FIELD: { "$in": id_variants(client_id) } })
            .await?;
        Ok(records.into_iter().filter(|s| s.serves(client_id)).collect())
    }

    async fn stream_staff(&self) -> Result<RecordStream<StaffRecord>> {
        let cursor = self.staff.find(doc! {}).await?;
        Ok(cursor
            .map(|item| {
                item.map_err(|e| cursor_failure(e.into()))
                    .and_then(StaffRecord::from_document)
            })
            .boxed())
    }

    async fn stream_clients(&self) -> Result<RecordStream<ClientRecord>> {
        let cursor = self.clients.find(doc! {}).await?;
        Ok(cursor
            .map(|item| {
                item.map_err(|e| cursor_failure(e.into()))
                    .and_then(ClientRecord::from_document)
            })
            .boxed())
    }

    async fn add_staff_to_client(&self, client_id: &ObjectId, staff_id: &ObjectId) -> Result<SetChange> {
        add_member(&self.clients, client_id, STAFFS_FIELD, staff_id, None).await
    }

    async fn add_client_to_staff(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<SetChange> {
        add_member(&self.staff, staff_id, CLIENT_IDS_FIELD, client_id, None).await
    }

    async fn remove_staff_from_client(&self, client_id: &ObjectId, staff_id: &ObjectId) -> Result<SetChange> {
        remove_member(&self.clients, client_id, STAFFS_FIELD, staff_id, None).await
    }

    async fn remove_client_from_staff(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<SetChange> {
        remove_member(&self.staff, staff_id, CLIENT_IDS_FIELD, client_id, None).await
    }

    fn supports_transactions(&self) -> bool {
        self.use_transactions
    }

    async fn assign_in_transaction(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<DualChange> {
        let mut session = self.mongo.start_session().await?;
        session.start_transaction().await?;
        let result = self.assign_with_session(&mut session, staff_id, client_id).await;
        self.finish_transaction(session, result).await
    }

    async fn unassign_in_transaction(&self, staff_id: &ObjectId, client_id: &ObjectId) -> Result<DualChange> {
        let mut session = self.mongo.start_session().await?;
        session.start_transaction().await?;
        let result = self.unassign_with_session(&mut session, staff_id, client_id).await;
        self.finish_transaction(session, result).await
    }
}

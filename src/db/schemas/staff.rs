//! Staff document schema
//!
//! `clientIds` is the forward side of the staff/client relationship and the
//! source of truth for reconciliation.

use bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;
use crate::db::schemas::{document_id, id_array, profile_to_json};
use crate::types::Result;

/// Collection name for staff
pub const STAFF_COLLECTION: &str = "staffs";

/// Field holding the ids of assigned clients
pub const CLIENT_IDS_FIELD: &str = "clientIds";

/// Staff document stored in MongoDB
#[derive(Clone, Debug, PartialEq)]
pub struct StaffRecord {
    pub id: ObjectId,
    /// Assigned clients (absent on the document reads as empty)
    pub client_ids: Vec<ObjectId>,
    /// Remaining profile fields, passed through untouched
    pub profile: Document,
}

impl StaffRecord {
    /// Create a staff record with no assignments
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            client_ids: Vec::new(),
            profile: Document::new(),
        }
    }

    pub fn with_clients(mut self, client_ids: impl IntoIterator<Item = ObjectId>) -> Self {
        for id in client_ids {
            if !self.client_ids.contains(&id) {
                self.client_ids.push(id);
            }
        }
        self
    }

    pub fn with_profile(mut self, profile: Document) -> Self {
        self.profile = profile;
        self
    }

    pub fn serves(&self, client_id: &ObjectId) -> bool {
        self.client_ids.contains(client_id)
    }

    /// Decode from a raw document
    pub fn from_document(mut doc: Document) -> Result<Self> {
        let id = document_id(&doc)?;
        let client_ids = id_array(&doc, CLIENT_IDS_FIELD)?.unwrap_or_default();
        doc.remove("_id");
        doc.remove(CLIENT_IDS_FIELD);
        Ok(Self {
            id,
            client_ids,
            profile: doc,
        })
    }

    /// Encode to a raw document
    pub fn to_document(&self) -> Document {
        let mut doc = doc! {
            "_id": self.id,
            CLIENT_IDS_FIELD: self.client_ids.iter().map(|id| Bson::ObjectId(*id)).collect::<Vec<_>>(),
        };
        for (k, v) in &self.profile {
            doc.insert(k.clone(), v.clone());
        }
        doc
    }

    /// JSON shape served by the read API
    pub fn to_view(&self) -> StaffView {
        StaffView {
            id: self.id.to_hex(),
            client_ids: self.client_ids.iter().map(|id| id.to_hex()).collect(),
            profile: profile_to_json(&self.profile),
        }
    }
}

/// Staff as returned by the read API
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StaffView {
    pub id: String,
    #[serde(default)]
    pub client_ids: Vec<String>,
    #[serde(flatten)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

impl IntoIndexes for StaffRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Multikey index backing the forward scan
            (
                doc! { CLIENT_IDS_FIELD: 1 },
                Some(
                    IndexOptions::builder()
                        .name("client_ids_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

//! Client document schema
//!
//! `staffs` is the denormalized inverse of `Staff.clientIds`. Legacy records
//! may not carry the field at all.

use bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::IndexOptions;

use crate::db::mongo::IntoIndexes;
use crate::db::schemas::{document_id, id_array};
use crate::types::Result;

/// Collection name for clients
pub const CLIENT_COLLECTION: &str = "clients";

/// Field holding the ids of assigned staff
pub const STAFFS_FIELD: &str = "staffs";

/// Client document stored in MongoDB
#[derive(Clone, Debug, PartialEq)]
pub struct ClientRecord {
    pub id: ObjectId,
    /// Assigned staff; `None` when the field has never been written
    pub staffs: Option<Vec<ObjectId>>,
    /// Remaining profile fields, passed through untouched
    pub profile: Document,
}

impl ClientRecord {
    /// Create a legacy-shaped client with no `staffs` field
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            staffs: None,
            profile: Document::new(),
        }
    }

    pub fn with_staffs(mut self, staffs: impl IntoIterator<Item = ObjectId>) -> Self {
        let mut set: Vec<ObjectId> = Vec::new();
        for id in staffs {
            if !set.contains(&id) {
                set.push(id);
            }
        }
        self.staffs = Some(set);
        self
    }

    pub fn with_profile(mut self, profile: Document) -> Self {
        self.profile = profile;
        self
    }

    /// Staff ids on the inverse side, empty when absent
    pub fn staff_ids(&self) -> &[ObjectId] {
        self.staffs.as_deref().unwrap_or(&[])
    }

    pub fn has_staff(&self, staff_id: &ObjectId) -> bool {
        self.staff_ids().contains(staff_id)
    }

    /// Decode from a raw document
    pub fn from_document(mut doc: Document) -> Result<Self> {
        let id = document_id(&doc)?;
        let staffs = id_array(&doc, STAFFS_FIELD)?;
        doc.remove("_id");
        doc.remove(STAFFS_FIELD);
        Ok(Self {
            id,
            staffs,
            profile: doc,
        })
    }

    /// Encode to a raw document; an absent `staffs` stays absent
    pub fn to_document(&self) -> Document {
        let mut doc = doc! { "_id": self.id };
        if let Some(ref staffs) = self.staffs {
            doc.insert(
                STAFFS_FIELD,
                staffs.iter().map(|id| Bson::ObjectId(*id)).collect::<Vec<_>>(),
            );
        }
        for (k, v) in &self.profile {
            doc.insert(k.clone(), v.clone());
        }
        doc
    }
}

impl IntoIndexes for ClientRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Used by the audit and the forward repair phase
            (
                doc! { STAFFS_FIELD: 1 },
                Some(
                    IndexOptions::builder()
                        .name("staffs_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

//! Database schemas for Tether
//!
//! Staff and client documents are read as raw BSON and converted here, so
//! legacy records (hex-string ids, missing arrays) decode instead of failing.

mod client;
mod staff;

pub use client::{ClientRecord, CLIENT_COLLECTION, STAFFS_FIELD};
pub use staff::{StaffRecord, StaffView, CLIENT_IDS_FIELD, STAFF_COLLECTION};

use bson::{oid::ObjectId, Bson, Document};

use crate::types::{Result, TetherError};

/// Parse a hex id received over HTTP
pub fn parse_id(raw: &str) -> Result<ObjectId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TetherError::BadRequest("Empty id".into()));
    }
    Ok(ObjectId::parse_str(trimmed)?)
}

/// Read the `_id` of a document
pub(crate) fn document_id(doc: &Document) -> Result<ObjectId> {
    match doc.get("_id") {
        Some(value) => id_from_bson(value)
            .ok_or_else(|| TetherError::Parse(format!("Unsupported _id value: {}", value))),
        None => Err(TetherError::Parse("Document has no _id".into())),
    }
}

/// Accept native ObjectIds and their hex-string form
pub(crate) fn id_from_bson(value: &Bson) -> Option<ObjectId> {
    match value {
        Bson::ObjectId(oid) => Some(*oid),
        Bson::String(s) => ObjectId::parse_str(s).ok(),
        _ => None,
    }
}

/// Decode an id array field; entries that are not ids are dropped.
///
/// Returns `None` when the field is absent or null, and the decoded ids
/// (deduplicated, first occurrence wins) otherwise.
pub(crate) fn id_array(doc: &Document, field: &str) -> Result<Option<Vec<ObjectId>>> {
    match doc.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Array(items)) => {
            let mut ids: Vec<ObjectId> = Vec::with_capacity(items.len());
            for item in items {
                match id_from_bson(item) {
                    Some(id) if !ids.contains(&id) => ids.push(id),
                    Some(_) => {}
                    None => tracing::warn!(field, value = %item, "Dropping non-id array entry"),
                }
            }
            Ok(Some(ids))
        }
        Some(other) => Err(TetherError::Parse(format!(
            "Field '{}' is not an array: {}",
            field, other
        ))),
    }
}

/// Convert leftover profile fields to relaxed extended JSON
pub(crate) fn profile_to_json(profile: &Document) -> serde_json::Map<String, serde_json::Value> {
    profile
        .iter()
        .map(|(k, v)| (k.clone(), v.clone().into_relaxed_extjson()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_parse_id() {
        let oid = ObjectId::new();
        assert_eq!(parse_id(&oid.to_hex()).unwrap(), oid);
        assert!(matches!(parse_id(""), Err(TetherError::BadRequest(_))));
        assert!(matches!(parse_id("xyz"), Err(TetherError::BadRequest(_))));
    }

    #[test]
    fn test_id_array_accepts_legacy_strings_and_dedupes() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        let doc = doc! { "ids": [a, b.to_hex(), a, 42] };
        assert_eq!(id_array(&doc, "ids").unwrap(), Some(vec![a, b]));
    }

    #[test]
    fn test_id_array_absent_vs_empty() {
        let doc = doc! { "empty": [], "nothing": Bson::Null };
        assert_eq!(id_array(&doc, "missing").unwrap(), None);
        assert_eq!(id_array(&doc, "nothing").unwrap(), None);
        assert_eq!(id_array(&doc, "empty").unwrap(), Some(vec![]));
    }

    #[test]
    fn test_id_array_rejects_scalar() {
        let doc = doc! { "ids": "not-an-array" };
        assert!(matches!(id_array(&doc, "ids"), Err(TetherError::Parse(_))));
    }
}

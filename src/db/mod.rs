//! Database layer for Tether
//!
//! MongoDB connection handling and the staff/client document schemas.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient};
pub use schemas::{parse_id, ClientRecord, StaffRecord, StaffView};

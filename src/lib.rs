//! Tether - keeps staff/client assignments consistent
//!
//! Staff records own the authoritative `clientIds` list; client records carry
//! a denormalized `staffs` back-reference for fast reads.
//!
//! ## Components
//!
//! - **Reconciler**: batch backfill of `Client.staffs` from `Staff.clientIds`
//! - **Resolver**: staff-for-client reads, index first with a scan fallback
//! - **Assignments**: dual writes that keep both sides in step
//! - **Audit**: read-only report of invariant violations
//! - **Server**: HTTP read and assignment API
//! - **Client**: typed reqwest client for the HTTP API

pub mod client;
pub mod config;
pub mod db;
pub mod logging;
pub mod relations;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;

pub use client::TetherClient;
pub use config::{ReconcileArgs, ServerArgs, StoreArgs};
pub use server::{run, AppState};
pub use store::{MemoryStore, MongoStore, RelationStore};
pub use types::{Result, TetherError};

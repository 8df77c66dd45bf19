//! Configuration for Tether
//!
//! CLI arguments and environment variable handling using clap. Both binaries
//! share `StoreArgs`; nothing reads the process environment after parsing.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::db::schemas::{CLIENT_COLLECTION, STAFF_COLLECTION};

/// Which store implementation backs the service
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// MongoDB (production)
    Mongo,
    /// Process-local maps, lost on exit (development only)
    Memory,
}

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Store connection configuration
#[derive(Parser, Debug, Clone)]
pub struct StoreArgs {
    /// Store backend
    #[arg(long, env = "STORE_BACKEND", value_enum, default_value = "mongo")]
    pub store: StoreBackend,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "realestate")]
    pub mongodb_db: String,

    /// Collection holding staff documents
    #[arg(long, env = "STAFF_COLLECTION", default_value = STAFF_COLLECTION)]
    pub staff_collection: String,

    /// Collection holding client documents
    #[arg(long, env = "CLIENT_COLLECTION", default_value = CLIENT_COLLECTION)]
    pub client_collection: String,

    /// Use multi-document transactions for dual writes (requires a replica set)
    #[arg(long, env = "USE_TRANSACTIONS", default_value = "false")]
    pub use_transactions: bool,
}

/// Tether - staff/client relationship service
#[derive(Parser, Debug, Clone)]
#[command(name = "tether")]
#[command(about = "Staff/client relationship read and assignment API")]
pub struct ServerArgs {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Store configuration
    #[command(flatten)]
    pub store: StoreArgs,

    /// Timeout for the indexed (fast) read path in milliseconds
    #[arg(long, env = "FAST_TIMEOUT_MS", default_value = "500")]
    pub fast_timeout_ms: u64,

    /// Timeout for the full-scan (slow) read path in milliseconds
    #[arg(long, env = "SLOW_TIMEOUT_MS", default_value = "5000")]
    pub slow_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// tether-reconcile - backfill Client.staffs from Staff.clientIds
#[derive(Parser, Debug, Clone)]
#[command(name = "tether-reconcile")]
#[command(about = "Repair the staff/client back-references in the document store")]
#[command(version)]
pub struct ReconcileArgs {
    /// Store configuration
    #[command(flatten)]
    pub store: StoreArgs,

    /// Number of staff records processed concurrently
    #[arg(long, env = "RECONCILE_CONCURRENCY", default_value = "8")]
    pub concurrency: usize,

    /// Report what would change without writing
    #[arg(long, env = "RECONCILE_DRY_RUN", default_value = "false")]
    pub dry_run: bool,

    /// Also add client ids found in Client.staffs to the matching Staff.clientIds
    #[arg(long, env = "RECONCILE_REPAIR_FORWARD", default_value = "false")]
    pub repair_forward: bool,

    /// Only audit the invariant, never write
    #[arg(long, default_value = "false")]
    pub audit: bool,

    /// Print the summary as JSON instead of text
    #[arg(long, default_value = "false")]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl ServerArgs {
    pub fn fast_timeout(&self) -> Duration {
        Duration::from_millis(self.fast_timeout_ms)
    }

    pub fn slow_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.fast_timeout_ms == 0 || self.slow_timeout_ms == 0 {
            return Err("FAST_TIMEOUT_MS and SLOW_TIMEOUT_MS must be positive".to_string());
        }

        if self.fast_timeout_ms > self.slow_timeout_ms {
            return Err("FAST_TIMEOUT_MS must be less than or equal to SLOW_TIMEOUT_MS".to_string());
        }

        self.store.validate()
    }
}

impl ReconcileArgs {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("RECONCILE_CONCURRENCY must be at least 1".to_string());
        }

        self.store.validate()
    }
}

impl StoreArgs {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.staff_collection.is_empty() || self.client_collection.is_empty() {
            return Err("Collection names must not be empty".to_string());
        }

        if self.staff_collection == self.client_collection {
            return Err("STAFF_COLLECTION and CLIENT_COLLECTION must differ".to_string());
        }

        Ok(())
    }
}

//! MongoDB client wrapper
//!
//! Connects with short server-selection timeouts so an unreachable store
//! fails fast, and applies schema-declared indexes per collection.

use bson::{doc, Document};
use mongodb::{options::IndexOptions, Client, ClientSession, Collection, IndexModel};
use tracing::{info, warn};

use crate::types::{Result, TetherError};

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client and verify it with a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB at {}", redact_uri(uri));

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri).await.map_err(|e| {
            TetherError::StoreUnavailable(format!("Failed to connect to MongoDB: {}", e))
        })?;

        let mongo = Self {
            client,
            db_name: db_name.to_string(),
        };
        mongo.ping().await?;

        info!("Connected to MongoDB database '{}'", db_name);
        Ok(mongo)
    }

    /// Round-trip to the server; any failure counts as unavailable
    pub async fn ping(&self) -> Result<()> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| TetherError::StoreUnavailable(format!("MongoDB ping failed: {}", e)))
    }

    /// Get a raw document collection
    pub fn collection(&self, name: &str) -> Collection<Document> {
        self.client.database(&self.db_name).collection::<Document>(name)
    }

    /// Get a collection and apply the indexes declared by `T`
    pub async fn indexed_collection<T: IntoIndexes>(&self, name: &str) -> Result<Collection<Document>> {
        let collection = self.collection(name);
        apply_indexes::<T>(&collection).await?;
        Ok(collection)
    }

    /// Start a session for multi-document transactions
    pub async fn start_session(&self) -> Result<ClientSession> {
        Ok(self.client.start_session().await?)
    }

    /// Get the database name
    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Apply schema-defined indexes
async fn apply_indexes<T: IntoIndexes>(collection: &Collection<Document>) -> Result<()> {
    let schema_indices = T::into_indices();

    if schema_indices.is_empty() {
        return Ok(());
    }

    let indices: Vec<IndexModel> = schema_indices
        .into_iter()
        .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
        .collect();

    // Index creation needs write privileges a read-only deployment may lack
    if let Err(e) = collection.create_indexes(indices).await {
        let err = TetherError::from(e);
        if err.is_fatal() {
            return Err(err);
        }
        warn!(
            collection = collection.name(),
            error = %err,
            "Failed to create indexes, continuing without them"
        );
    }

    Ok(())
}

/// Strip credentials from a connection string before logging it
pub(crate) fn redact_uri(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &uri[..scheme_end], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}

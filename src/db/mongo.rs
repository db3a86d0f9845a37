//! MongoDB client and typed collection wrapper
//!
//! Collections declare their own indexes through [`IntoIndexes`]; they are
//! created when the collection handle is first opened.

use bson::{doc, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::{
    options::{ClientOptions, IndexOptions},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::db::schemas::Metadata;
use crate::types::GateError;

/// Server selection and connect timeout; an unreachable cluster fails fast
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Schemas that declare their indexes
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Schemas carrying [`Metadata`] timestamps
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// Connected MongoDB database handle
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and ping `db_name`
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, GateError> {
        info!("Connecting to MongoDB");

        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| GateError::Config(format!("Invalid MongoDB URI: {}", e)))?;
        options.server_selection_timeout.get_or_insert(CONNECT_TIMEOUT);
        options.connect_timeout.get_or_insert(CONNECT_TIMEOUT);
        options.app_name.get_or_insert_with(|| "linkgate".to_string());

        let client = Client::with_options(options)
            .map_err(|e| GateError::Storage(format!("Failed to create MongoDB client: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GateError::Storage(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Open a typed collection, creating its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, GateError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        let collection = MongoCollection {
            inner: self.client.database(&self.db_name).collection::<T>(name),
        };
        collection.ensure_indexes().await?;
        Ok(collection)
    }

    /// Raw client, for sessions and transactions
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Typed collection; every driver error becomes [`GateError::Storage`]
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    fn storage_error(&self, op: &str, e: mongodb::error::Error) -> GateError {
        GateError::Storage(format!("{} on '{}' failed: {}", op, self.inner.name(), e))
    }

    async fn ensure_indexes(&self) -> Result<(), GateError>
    where
        T: IntoIndexes,
    {
        let models: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        if models.is_empty() {
            return Ok(());
        }

        debug!(collection = self.inner.name(), count = models.len(), "Ensuring indexes");
        self.inner
            .create_indexes(models)
            .await
            .map_err(|e| self.storage_error("Index creation", e))?;
        Ok(())
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, GateError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| self.storage_error("Find", e))
    }

    /// All documents matching `filter`; a bad document fails the whole read
    pub async fn find_many(&self, filter: Document) -> Result<Vec<T>, GateError> {
        let cursor = self
            .inner
            .find(filter)
            .await
            .map_err(|e| self.storage_error("Find", e))?;

        cursor
            .try_collect()
            .await
            .map_err(|e| self.storage_error("Cursor read", e))
    }

    /// Update one document, stamping `metadata.updated_at`
    pub async fn update_one(
        &self,
        filter: Document,
        mut update: Document,
    ) -> Result<UpdateResult, GateError> {
        let mut set = update.get_document("$set").cloned().unwrap_or_default();
        set.insert("metadata.updated_at", DateTime::now());
        update.insert("$set", set);

        self.inner
            .update_one(filter, update)
            .await
            .map_err(|e| self.storage_error("Update", e))
    }

    /// Returns whether a document was removed
    pub async fn delete_one(&self, filter: Document) -> Result<bool, GateError> {
        let result = self
            .inner
            .delete_one(filter)
            .await
            .map_err(|e| self.storage_error("Delete", e))?;
        Ok(result.deleted_count > 0)
    }

    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + MutMetadata,
{
    /// Insert a document, filling in its timestamps
    pub async fn insert_one(&self, mut item: T) -> Result<(), GateError> {
        let now = DateTime::now();
        let metadata = item.mut_metadata();
        metadata.created_at.get_or_insert(now);
        metadata.updated_at = Some(now);

        self.inner
            .insert_one(item)
            .await
            .map_err(|e| self.storage_error("Insert", e))?;
        Ok(())
    }
}

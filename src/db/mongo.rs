//! MongoDB client, typed collections and the MongoDB [`DataFlowStore`]

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, DateTime, Document};
use futures_util::StreamExt;
use mongodb::{Client, Collection, IndexModel};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use super::schemas::{
    DataFlowRequestDoc, IntoIndexes, Metadata, MutMetadata, NotificationDoc, ProcessedEntryDoc,
    TrackedResourcesDoc, TransactionStatusDoc, DATA_FLOW_REQUEST_COLLECTION,
    NOTIFICATION_COLLECTION, PROCESSED_ENTRY_COLLECTION, TRACKED_RESOURCE_COLLECTION,
    TRANSACTION_STATUS_COLLECTION,
};
use super::store::{DataFlowRequestKeys, DataFlowStore};
use crate::models::{NotificationPayload, ProcessedEntry, TrackedResourceReference, TransactionStatus};
use crate::types::{DataFlowError, Result};

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and ping the database
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB");

        // Fail fast on an unreachable server instead of hanging at startup
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| DataFlowError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DataFlowError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection with its indexes applied
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes + MutMetadata,
{
    pub async fn new(client: &Client, db_name: &str, collection_name: &str) -> Result<Self> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<()> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| DataFlowError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert or replace the document matching `filter`
    pub async fn upsert(&self, filter: Document, mut item: T) -> Result<()> {
        let metadata = item.mut_metadata();
        let now = DateTime::now();
        metadata.created_at.get_or_insert(now);
        metadata.updated_at = Some(now);

        self.inner
            .replace_one(filter, item)
            .upsert(true)
            .await
            .map_err(|e| DataFlowError::Database(format!("Upsert failed: {}", e)))?;
        Ok(())
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| DataFlowError::Database(format!("Find failed: {}", e)))
    }

    pub async fn find_many(&self, filter: Document, sort: Document) -> Result<Vec<T>> {
        let cursor = self
            .inner
            .find(filter)
            .sort(sort)
            .await
            .map_err(|e| DataFlowError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    /// Apply `update` to the document matching `filter`, without upserting.
    /// Returns whether a document matched.
    pub async fn update_one(&self, filter: Document, update: Document) -> Result<bool> {
        let result = self
            .inner
            .update_one(filter, update)
            .await
            .map_err(|e| DataFlowError::Database(format!("Update failed: {}", e)))?;
        Ok(result.matched_count > 0)
    }

    /// Hard delete; used for key material, which must not outlive its
    /// transaction
    pub async fn delete_one(&self, filter: Document) -> Result<()> {
        self.inner
            .delete_one(filter)
            .await
            .map_err(|e| DataFlowError::Database(format!("Delete failed: {}", e)))?;
        Ok(())
    }
}

fn by_transaction(transaction_id: &str) -> Document {
    doc! { "transaction_id": transaction_id }
}

/// MongoDB-backed [`DataFlowStore`]
pub struct MongoStore {
    requests: MongoCollection<DataFlowRequestDoc>,
    notifications: MongoCollection<NotificationDoc>,
    entries: MongoCollection<ProcessedEntryDoc>,
    tracked: MongoCollection<TrackedResourcesDoc>,
    statuses: MongoCollection<TransactionStatusDoc>,
}

impl MongoStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            requests: client.collection(DATA_FLOW_REQUEST_COLLECTION).await?,
            notifications: client.collection(NOTIFICATION_COLLECTION).await?,
            entries: client.collection(PROCESSED_ENTRY_COLLECTION).await?,
            tracked: client.collection(TRACKED_RESOURCE_COLLECTION).await?,
            statuses: client.collection(TRANSACTION_STATUS_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl DataFlowStore for MongoStore {
    async fn save_request_keys(&self, keys: DataFlowRequestKeys) -> Result<()> {
        let filter = by_transaction(&keys.transaction_id);
        let doc = DataFlowRequestDoc {
            _id: None,
            metadata: Metadata {
                created_at: Some(DateTime::from_chrono(keys.created_at)),
                updated_at: None,
            },
            transaction_id: keys.transaction_id,
            consent_request_id: keys.consent_request_id,
            key_material: keys.key_material,
            expires_at: DateTime::from_chrono(keys.expires_at),
        };
        self.requests.upsert(filter, doc).await
    }

    async fn request_keys(&self, transaction_id: &str) -> Result<Option<DataFlowRequestKeys>> {
        // The TTL monitor runs about once a minute; filter out what it has not reached yet
        let filter = doc! {
            "transaction_id": transaction_id,
            "expires_at": { "$gt": DateTime::now() },
        };
        let doc = self.requests.find_one(filter).await?;
        Ok(doc.map(|d| DataFlowRequestKeys {
            expires_at: d.expires_at.to_chrono(),
            created_at: d
                .metadata
                .created_at
                .map(|t| t.to_chrono())
                .unwrap_or_else(chrono::Utc::now),
            transaction_id: d.transaction_id,
            consent_request_id: d.consent_request_id,
            key_material: d.key_material,
        }))
    }

    async fn remove_request_keys(&self, transaction_id: &str) -> Result<()> {
        self.requests.delete_one(by_transaction(transaction_id)).await
    }

    async fn save_notification(&self, payload: &NotificationPayload) -> Result<()> {
        let doc = NotificationDoc {
            _id: None,
            metadata: Metadata::default(),
            transaction_id: payload.transaction_id.clone(),
            payload: payload.clone(),
        };
        self.notifications
            .upsert(by_transaction(&payload.transaction_id), doc)
            .await
    }

    async fn notification(&self, transaction_id: &str) -> Result<Option<NotificationPayload>> {
        Ok(self
            .notifications
            .find_one(by_transaction(transaction_id))
            .await?
            .map(|d| d.payload))
    }

    async fn put(
        &self,
        transaction_id: &str,
        entry_index: usize,
        result: &ProcessedEntry,
    ) -> Result<()> {
        let entry_index = i64::try_from(entry_index)
            .map_err(|_| DataFlowError::Internal(format!("Entry index {entry_index} out of range")))?;
        let filter = doc! { "transaction_id": transaction_id, "entry_index": entry_index };
        let doc = ProcessedEntryDoc {
            _id: None,
            metadata: Metadata::default(),
            transaction_id: transaction_id.to_string(),
            entry_index,
            entry: result.clone(),
        };
        self.entries.upsert(filter, doc).await
    }

    async fn entries(&self, transaction_id: &str) -> Result<Vec<ProcessedEntry>> {
        let docs = self
            .entries
            .find_many(by_transaction(transaction_id), doc! { "entry_index": 1 })
            .await?;
        Ok(docs.into_iter().map(|d| d.entry).collect())
    }

    async fn put_tracked_resources(
        &self,
        transaction_id: &str,
        resources: &[TrackedResourceReference],
    ) -> Result<()> {
        let doc = TrackedResourcesDoc {
            _id: None,
            metadata: Metadata::default(),
            transaction_id: transaction_id.to_string(),
            resources: resources.to_vec(),
        };
        self.tracked.upsert(by_transaction(transaction_id), doc).await
    }

    async fn tracked_resources(&self, transaction_id: &str) -> Result<Vec<TrackedResourceReference>> {
        Ok(self
            .tracked
            .find_one(by_transaction(transaction_id))
            .await?
            .map(|d| d.resources)
            .unwrap_or_default())
    }

    async fn set_status(&self, transaction_id: &str, status: TransactionStatus) -> Result<()> {
        let doc = TransactionStatusDoc {
            _id: None,
            metadata: Metadata::default(),
            transaction_id: transaction_id.to_string(),
            status,
        };
        self.statuses.upsert(by_transaction(transaction_id), doc).await
    }

    async fn status(&self, transaction_id: &str) -> Result<Option<TransactionStatus>> {
        Ok(self
            .statuses
            .find_one(by_transaction(transaction_id))
            .await?
            .map(|d| d.status))
    }

    async fn claim(&self, transaction_id: &str, lease: Duration) -> Result<bool> {
        let now = DateTime::now();
        let (filter, update) = claim_filter(transaction_id, now, lease)?;
        if self.statuses.update_one(filter, update).await? {
            return Ok(true);
        }

        // No status written yet: nothing to contend with
        if self.status(transaction_id).await?.is_none() {
            self.set_status(transaction_id, TransactionStatus::Processing).await?;
            return Ok(true);
        }
        Ok(false)
    }
}

/// Filter matching a claimable status document, and the update taking it
fn claim_filter(transaction_id: &str, now: DateTime, lease: Duration) -> Result<(Document, Document)> {
    let processing = bson::to_bson(&TransactionStatus::Processing)
        .map_err(|e| DataFlowError::Internal(format!("Failed to encode status: {e}")))?;
    let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
    let stale_before = DateTime::from_millis(now.timestamp_millis().saturating_sub(lease_ms));

    let filter = doc! {
        "transaction_id": transaction_id,
        "$or": [
            { "status": { "$ne": processing.clone() } },
            { "metadata.updated_at": { "$lt": stale_before } },
        ],
    };
    let update = doc! {
        "$set": { "status": processing, "metadata.updated_at": now },
    };
    Ok((filter, update))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Round trips against a live server live outside the unit suite; these
    // cover the filters the store builds.

    #[test]
    fn test_transaction_filter() {
        let filter = by_transaction("t-1");
        assert_eq!(filter.get_str("transaction_id").unwrap(), "t-1");
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_claim_filter_allows_stale_processing() {
        let now = DateTime::from_millis(1_000_000);
        let (filter, update) = claim_filter("t-1", now, Duration::from_secs(300)).unwrap();

        assert_eq!(filter.get_str("transaction_id").unwrap(), "t-1");
        let alternatives = filter.get_array("$or").unwrap();
        let stale = alternatives[1]
            .as_document()
            .unwrap()
            .get_document("metadata.updated_at")
            .unwrap()
            .get_datetime("$lt")
            .unwrap();
        assert_eq!(stale.timestamp_millis(), 700_000);

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("status").unwrap(), "PROCESSING");
    }
}

//! Persistence sink for data-flow state

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{KeyMaterialGenerator, LocalKeyMaterial};
use crate::models::{NotificationPayload, ProcessedEntry, TrackedResourceReference, TransactionStatus};
use crate::types::Result;

/// Keys stored when a data-flow request is prepared, consumed when the
/// transaction has been processed. Stores never return them past
/// `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFlowRequestKeys {
    pub transaction_id: String,
    pub consent_request_id: String,
    pub key_material: LocalKeyMaterial,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DataFlowRequestKeys {
    /// Keys valid for the default key lifetime
    pub fn new(transaction_id: &str, consent_request_id: &str, key_material: LocalKeyMaterial) -> Self {
        let created_at = Utc::now();
        Self {
            transaction_id: transaction_id.to_string(),
            consent_request_id: consent_request_id.to_string(),
            key_material,
            created_at,
            expires_at: created_at + KeyMaterialGenerator::default().key_lifetime(),
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Storage used by ingestion, processing and the status endpoint.
///
/// Writes are idempotent per key so a redelivered transaction can be
/// processed again without duplicating results.
#[async_trait]
pub trait DataFlowStore: Send + Sync {
    async fn save_request_keys(&self, keys: DataFlowRequestKeys) -> Result<()>;

    /// Unexpired keys of a transaction
    async fn request_keys(&self, transaction_id: &str) -> Result<Option<DataFlowRequestKeys>>;

    async fn remove_request_keys(&self, transaction_id: &str) -> Result<()>;

    /// Store a pushed notification, replacing an earlier push for the
    /// same transaction
    async fn save_notification(&self, payload: &NotificationPayload) -> Result<()>;

    async fn notification(&self, transaction_id: &str) -> Result<Option<NotificationPayload>>;

    /// Store the result of one entry, keyed by `(transaction_id, entry_index)`
    async fn put(
        &self,
        transaction_id: &str,
        entry_index: usize,
        result: &ProcessedEntry,
    ) -> Result<()>;

    /// Processed entries of a transaction, ordered by entry index
    async fn entries(&self, transaction_id: &str) -> Result<Vec<ProcessedEntry>>;

    /// Replace the tracked resources of a transaction
    async fn put_tracked_resources(
        &self,
        transaction_id: &str,
        resources: &[TrackedResourceReference],
    ) -> Result<()>;

    async fn tracked_resources(&self, transaction_id: &str) -> Result<Vec<TrackedResourceReference>>;

    async fn set_status(&self, transaction_id: &str, status: TransactionStatus) -> Result<()>;

    async fn status(&self, transaction_id: &str) -> Result<Option<TransactionStatus>>;

    /// Move a transaction to PROCESSING unless another worker has held it
    /// there for less than `lease`. Returns whether the claim was taken.
    async fn claim(&self, transaction_id: &str, lease: Duration) -> Result<bool>;

    /// Final status of a transaction whose results are stored.
    ///
    /// A terminal status without stored entries (a message given up on
    /// before any result was written) does not count as settled.
    async fn settled_status(&self, transaction_id: &str) -> Result<Option<TransactionStatus>> {
        match self.status(transaction_id).await? {
            Some(status) if status.is_terminal() => {
                if self.entries(transaction_id).await?.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(status))
                }
            }
            _ => Ok(None),
        }
    }
}

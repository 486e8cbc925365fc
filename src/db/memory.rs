//! In-memory store for development mode and tests

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::store::{DataFlowRequestKeys, DataFlowStore};
use crate::models::{NotificationPayload, ProcessedEntry, TrackedResourceReference, TransactionStatus};
use crate::types::Result;

/// DashMap-backed [`DataFlowStore`]. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    keys: DashMap<String, DataFlowRequestKeys>,
    notifications: DashMap<String, NotificationPayload>,
    entries: DashMap<String, BTreeMap<usize, ProcessedEntry>>,
    tracked: DashMap<String, Vec<TrackedResourceReference>>,
    /// Status with the time it was last written
    statuses: DashMap<String, (TransactionStatus, Instant)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataFlowStore for MemoryStore {
    async fn save_request_keys(&self, keys: DataFlowRequestKeys) -> Result<()> {
        self.keys.insert(keys.transaction_id.clone(), keys);
        Ok(())
    }

    async fn request_keys(&self, transaction_id: &str) -> Result<Option<DataFlowRequestKeys>> {
        let keys = self.keys.get(transaction_id).map(|k| k.value().clone());
        match keys {
            Some(keys) if keys.is_expired() => {
                self.keys.remove(transaction_id);
                Ok(None)
            }
            keys => Ok(keys),
        }
    }

    async fn remove_request_keys(&self, transaction_id: &str) -> Result<()> {
        self.keys.remove(transaction_id);
        Ok(())
    }

    async fn save_notification(&self, payload: &NotificationPayload) -> Result<()> {
        self.notifications
            .insert(payload.transaction_id.clone(), payload.clone());
        Ok(())
    }

    async fn notification(&self, transaction_id: &str) -> Result<Option<NotificationPayload>> {
        Ok(self.notifications.get(transaction_id).map(|n| n.value().clone()))
    }

    async fn put(
        &self,
        transaction_id: &str,
        entry_index: usize,
        result: &ProcessedEntry,
    ) -> Result<()> {
        self.entries
            .entry(transaction_id.to_string())
            .or_default()
            .insert(entry_index, result.clone());
        Ok(())
    }

    async fn entries(&self, transaction_id: &str) -> Result<Vec<ProcessedEntry>> {
        Ok(self
            .entries
            .get(transaction_id)
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_tracked_resources(
        &self,
        transaction_id: &str,
        resources: &[TrackedResourceReference],
    ) -> Result<()> {
        self.tracked
            .insert(transaction_id.to_string(), resources.to_vec());
        Ok(())
    }

    async fn tracked_resources(&self, transaction_id: &str) -> Result<Vec<TrackedResourceReference>> {
        Ok(self
            .tracked
            .get(transaction_id)
            .map(|t| t.value().clone())
            .unwrap_or_default())
    }

    async fn set_status(&self, transaction_id: &str, status: TransactionStatus) -> Result<()> {
        self.statuses
            .insert(transaction_id.to_string(), (status, Instant::now()));
        Ok(())
    }

    async fn status(&self, transaction_id: &str) -> Result<Option<TransactionStatus>> {
        Ok(self.statuses.get(transaction_id).map(|s| s.value().0))
    }

    async fn claim(&self, transaction_id: &str, lease: Duration) -> Result<bool> {
        match self.statuses.entry(transaction_id.to_string()) {
            Entry::Occupied(mut held) => {
                let (status, since) = *held.get();
                if status == TransactionStatus::Processing && since.elapsed() < lease {
                    return Ok(false);
                }
                held.insert((TransactionStatus::Processing, Instant::now()));
                Ok(true)
            }
            Entry::Vacant(slot) => {
                slot.insert((TransactionStatus::Processing, Instant::now()));
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyMaterialGenerator;

    fn entry(index: usize) -> ProcessedEntry {
        ProcessedEntry::errored("t1", index, "application/fhir+json", "boom")
    }

    #[tokio::test]
    async fn test_entries_ordered_and_idempotent() {
        let store = MemoryStore::new();
        store.put("t1", 2, &entry(2)).await.unwrap();
        store.put("t1", 0, &entry(0)).await.unwrap();
        store.put("t1", 2, &entry(2)).await.unwrap();

        let indexes: Vec<_> = store
            .entries("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.entry_index)
            .collect();
        assert_eq!(indexes, vec![0, 2]);
        assert!(store.entries("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_key_lifecycle() {
        let store = MemoryStore::new();
        let (local, _) = KeyMaterialGenerator::default().generate();
        store
            .save_request_keys(DataFlowRequestKeys::new("t1", "consent-1", local))
            .await
            .unwrap();

        let keys = store.request_keys("t1").await.unwrap().unwrap();
        assert_eq!(keys.consent_request_id, "consent-1");

        store.remove_request_keys("t1").await.unwrap();
        assert!(store.request_keys("t1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_overwrites() {
        let store = MemoryStore::new();
        assert_eq!(store.status("t1").await.unwrap(), None);
        store.set_status("t1", TransactionStatus::Received).await.unwrap();
        store.set_status("t1", TransactionStatus::Partial).await.unwrap();
        assert_eq!(
            store.status("t1").await.unwrap(),
            Some(TransactionStatus::Partial)
        );
    }

    #[tokio::test]
    async fn test_expired_keys_are_not_returned() {
        let store = MemoryStore::new();
        let (local, _) = KeyMaterialGenerator::default().generate();
        let expired = DataFlowRequestKeys::new("t1", "consent-1", local)
            .with_expiry(chrono::Utc::now() - chrono::Duration::seconds(1));
        store.save_request_keys(expired).await.unwrap();

        assert!(store.request_keys("t1").await.unwrap().is_none());
        assert!(store.keys.is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive_within_lease() {
        let store = MemoryStore::new();
        let lease = Duration::from_secs(60);
        store.set_status("t1", TransactionStatus::Received).await.unwrap();

        assert!(store.claim("t1", lease).await.unwrap());
        assert!(!store.claim("t1", lease).await.unwrap());
        assert_eq!(
            store.status("t1").await.unwrap(),
            Some(TransactionStatus::Processing)
        );

        // A released transaction can be claimed again
        store.set_status("t1", TransactionStatus::Received).await.unwrap();
        assert!(store.claim("t1", lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_claim_can_be_taken_over() {
        let store = MemoryStore::new();
        assert!(store.claim("t1", Duration::from_secs(60)).await.unwrap());
        assert!(store.claim("t1", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_settled_requires_terminal_status_and_results() {
        let store = MemoryStore::new();
        store.set_status("t1", TransactionStatus::Errored).await.unwrap();
        assert_eq!(store.settled_status("t1").await.unwrap(), None);

        store.put("t1", 0, &entry(0)).await.unwrap();
        assert_eq!(
            store.settled_status("t1").await.unwrap(),
            Some(TransactionStatus::Errored)
        );

        store.set_status("t1", TransactionStatus::Processing).await.unwrap();
        assert_eq!(store.settled_status("t1").await.unwrap(), None);
    }

    #[test]
    fn test_unknown_transaction_reads_empty() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            assert!(store.notification("missing").await.unwrap().is_none());
            assert!(store.request_keys("missing").await.unwrap().is_none());
            assert!(store.entries("missing").await.unwrap().is_empty());
            assert!(store.tracked_resources("missing").await.unwrap().is_empty());
            assert!(store.status("missing").await.unwrap().is_none());
            store.remove_request_keys("missing").await.unwrap();
        });
    }
}

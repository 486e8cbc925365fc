//! Key material for outgoing data-flow requests

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::crypto::KeyMaterialGenerator;
use crate::db::{DataFlowRequestKeys, DataFlowStore};
use crate::models::KeyMaterial;
use crate::types::{DataFlowError, Result};

pub struct DataFlowRequestService {
    store: Arc<dyn DataFlowStore>,
    generator: KeyMaterialGenerator,
}

impl DataFlowRequestService {
    pub fn new(store: Arc<dyn DataFlowStore>, generator: KeyMaterialGenerator) -> Self {
        Self { store, generator }
    }

    /// Generate and store fresh keys for a transaction and return the
    /// public half to send to the HIP.
    pub async fn prepare(&self, transaction_id: &str, consent_request_id: &str) -> Result<KeyMaterial> {
        if transaction_id.trim().is_empty() {
            return Err(DataFlowError::BadRequest("transactionId is required".into()));
        }
        if consent_request_id.trim().is_empty() {
            return Err(DataFlowError::BadRequest("consentRequestId is required".into()));
        }

        let (local, wire) = self.generator.generate();
        let keys = DataFlowRequestKeys::new(transaction_id, consent_request_id, local)
            .with_expiry(Utc::now() + self.generator.key_lifetime());
        self.store.save_request_keys(keys).await?;

        info!(
            transaction_id = %transaction_id,
            consent_request_id = %consent_request_id,
            "Prepared data-flow key material"
        );
        Ok(wire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::decode_public_key;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn test_prepare_stores_private_half() {
        let store = Arc::new(MemoryStore::new());
        let service = DataFlowRequestService::new(store.clone(), KeyMaterialGenerator::default());

        let wire = service.prepare("t1", "c1").await.unwrap();
        let keys = store.request_keys("t1").await.unwrap().unwrap();

        assert_eq!(keys.consent_request_id, "c1");
        assert!(keys.expires_at > Utc::now());
        assert_eq!(
            decode_public_key(&wire.dh_public_key.key_value).unwrap(),
            *keys.key_material.public_key()
        );
    }

    #[tokio::test]
    async fn test_prepare_requires_ids() {
        let service = DataFlowRequestService::new(Arc::new(MemoryStore::new()), KeyMaterialGenerator::default());
        assert!(matches!(
            service.prepare("", "c1").await,
            Err(DataFlowError::BadRequest(_))
        ));
        assert!(matches!(
            service.prepare("t1", " ").await,
            Err(DataFlowError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_prepared_keys_follow_generator_lifetime() {
        let store = Arc::new(MemoryStore::new());
        let generator = KeyMaterialGenerator::new(chrono::Duration::minutes(-1));
        let service = DataFlowRequestService::new(store.clone(), generator);

        service.prepare("t1", "c1").await.unwrap();
        assert!(store.request_keys("t1").await.unwrap().is_none());
    }
}

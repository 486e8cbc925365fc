//! MongoDB document structures
//!
//! One collection per concern, all keyed by `transaction_id`.

use std::time::Duration;

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::crypto::LocalKeyMaterial;
use crate::models::{NotificationPayload, ProcessedEntry, TrackedResourceReference, TransactionStatus};

pub const DATA_FLOW_REQUEST_COLLECTION: &str = "data_flow_requests";
pub const NOTIFICATION_COLLECTION: &str = "notifications";
pub const PROCESSED_ENTRY_COLLECTION: &str = "processed_entries";
pub const TRACKED_RESOURCE_COLLECTION: &str = "tracked_resources";
pub const TRANSACTION_STATUS_COLLECTION: &str = "transaction_status";

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Trait for schemas with mutable metadata
pub trait MutMetadata {
    fn mut_metadata(&mut self) -> &mut Metadata;
}

/// Creation and update timestamps
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Metadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime>,
}

fn unique_transaction_index() -> (Document, Option<IndexOptions>) {
    (
        doc! { "transaction_id": 1 },
        Some(
            IndexOptions::builder()
                .unique(true)
                .name("transaction_id_unique".to_string())
                .build(),
        ),
    )
}

macro_rules! impl_metadata {
    ($($doc:ty),+) => {
        $(impl MutMetadata for $doc {
            fn mut_metadata(&mut self) -> &mut Metadata {
                &mut self.metadata
            }
        })+
    };
}

/// Local key material of a prepared data-flow request
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DataFlowRequestDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub transaction_id: String,
    pub consent_request_id: String,
    pub key_material: LocalKeyMaterial,

    /// Removed by the TTL monitor once passed
    pub expires_at: DateTime,
}

impl IntoIndexes for DataFlowRequestDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_transaction_index(),
            (
                doc! { "expires_at": 1 },
                Some(
                    IndexOptions::builder()
                        .expire_after(Duration::ZERO)
                        .name("expires_at_ttl".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotificationDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub transaction_id: String,
    pub payload: NotificationPayload,
}

impl IntoIndexes for NotificationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![unique_transaction_index()]
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProcessedEntryDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub transaction_id: String,
    pub entry_index: i64,
    pub entry: ProcessedEntry,
}

impl IntoIndexes for ProcessedEntryDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "transaction_id": 1, "entry_index": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("transaction_entry_unique".to_string())
                    .build(),
            ),
        )]
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TrackedResourcesDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub transaction_id: String,

    #[serde(default)]
    pub resources: Vec<TrackedResourceReference>,
}

impl IntoIndexes for TrackedResourcesDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![unique_transaction_index()]
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TransactionStatusDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub transaction_id: String,
    pub status: TransactionStatus,
}

impl IntoIndexes for TransactionStatusDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_transaction_index(),
            (
                doc! { "status": 1 },
                Some(
                    IndexOptions::builder()
                        .name("status_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl_metadata!(
    DataFlowRequestDoc,
    NotificationDoc,
    ProcessedEntryDoc,
    TrackedResourcesDoc,
    TransactionStatusDoc
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexes_keyed_by_transaction() {
        for (keys, _) in DataFlowRequestDoc::into_indices()
            .into_iter()
            .take(1)
            .chain(NotificationDoc::into_indices())
            .chain(ProcessedEntryDoc::into_indices())
            .chain(TrackedResourcesDoc::into_indices())
            .chain(TransactionStatusDoc::into_indices().into_iter().take(1))
        {
            assert!(keys.contains_key("transaction_id"));
        }
    }

    #[test]
    fn test_status_doc_bson_roundtrip() {
        let doc = TransactionStatusDoc {
            _id: None,
            metadata: Metadata::default(),
            transaction_id: "t1".into(),
            status: TransactionStatus::Partial,
        };
        let bson = bson::to_document(&doc).unwrap();
        assert_eq!(bson.get_str("status").unwrap(), "PARTIAL");
        assert!(!bson.contains_key("_id"));

        let back: TransactionStatusDoc = bson::from_document(bson).unwrap();
        assert_eq!(back.status, TransactionStatus::Partial);
    }

    #[test]
    fn test_key_material_expires_by_ttl() {
        let (keys, options) = DataFlowRequestDoc::into_indices()
            .into_iter()
            .find(|(keys, _)| keys.contains_key("expires_at"))
            .unwrap();
        assert_eq!(keys.get_i32("expires_at").unwrap(), 1);
        assert_eq!(options.unwrap().expire_after, Some(Duration::ZERO));
    }
}

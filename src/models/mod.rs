//! Data model shared by ingestion, processing and persistence

pub mod notification;
pub mod processed;

pub use notification::{
    Delivery, DhPublicKey, Entry, KeyMaterial, NotificationPayload, CRYPTO_ALG, CURVE,
    KEY_PARAMETERS,
};
pub use processed::{
    DocumentType, EntryOutcome, ProcessedEntry, TrackedResourceReference, TransactionStatus,
};

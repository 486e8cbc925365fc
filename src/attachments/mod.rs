//! Attachment extraction: inline and linked binaries to local storage

pub mod extractor;
pub mod fetch;
pub mod storage;

pub use extractor::AttachmentExtractor;
pub use fetch::{HttpFetcher, RemoteFetcher};
pub use storage::{extension_for, AttachmentScope, AttachmentStorage, SavedAttachment};

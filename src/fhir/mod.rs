//! FHIR bundle processing
//!
//! A decrypted entry is a FHIR R4 JSON Bundle. [`BundleWalker`] dispatches
//! each resource to a type-specific handler, tracks the clinically relevant
//! ones and extracts their attachments.

pub mod classify;
pub mod context;
pub mod date;
pub mod handlers;
pub mod resource;
pub mod walker;

pub use context::{BundleContext, ParentContext, ResourceTracker};
pub use date::parse_fhir_date;
pub use resource::ResourceType;
pub use walker::{AttachmentJob, BundleWalker, Handler, Traversal, WalkResult};

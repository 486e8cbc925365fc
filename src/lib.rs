//! HIU data-flow - ingestion and indexing of pushed health information
//!
//! A Health Information Provider (HIP) pushes encrypted FHIR bundles for a
//! transaction the HIU requested. This crate accepts those pushes, decrypts
//! them with the key material prepared for the request, walks each bundle
//! to extract attachments and index clinically meaningful resources, and
//! persists the results.
//!
//! ## Components
//!
//! - **Routes**: notification, key-material, status and health endpoints
//! - **Crypto**: X25519 + HKDF-SHA256 + AES-256-GCM session decryption
//! - **FHIR**: bundle walker with a fixed per-resource-type dispatch table
//! - **Attachments**: local storage, remote downloads and DICOM routing
//! - **Workers**: NATS JetStream consumers, or an in-process pool
//! - **Store**: MongoDB, or in-memory for development

pub mod attachments;
pub mod config;
pub mod crypto;
pub mod db;
pub mod dicom;
pub mod fhir;
pub mod logging;
pub mod models;
pub mod nats;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;
pub mod worker;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{DataFlowError, Result};

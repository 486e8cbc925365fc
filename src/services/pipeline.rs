//! Wiring of the processing pipeline from configuration
//!
//! Shared by the service binary (embedded worker or in-process pool) and
//! the standalone worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::{DataFlowProcessor, EntryResolver};
use crate::attachments::{AttachmentExtractor, AttachmentStorage, HttpFetcher, RemoteFetcher};
use crate::config::Args;
use crate::db::{DataFlowStore, MemoryStore, MongoClient, MongoStore};
use crate::dicom::{DicomRouter, DicomWebClient};
use crate::fhir::BundleWalker;
use crate::types::Result;

/// Connect the configured store. In dev mode an unreachable MongoDB falls
/// back to the in-memory store; otherwise the error is returned.
pub async fn connect_store(args: &Args) -> Result<(Arc<dyn DataFlowStore>, &'static str)> {
    let connected = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => MongoStore::new(&client).await,
        Err(e) => Err(e),
    };

    match connected {
        Ok(store) => {
            info!("MongoDB connected successfully");
            Ok((Arc::new(store), "mongodb"))
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
            Ok((Arc::new(MemoryStore::new()), "memory"))
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            Err(e)
        }
    }
}

/// Build the transaction processor: fetcher, attachment extraction with
/// optional DICOM routing, bundle walker and entry resolver
pub fn build_processor(args: &Args, store: Arc<dyn DataFlowStore>) -> Result<Arc<DataFlowProcessor>> {
    let fetcher: Arc<dyn RemoteFetcher> = Arc::new(HttpFetcher::new(args.request_timeout())?);
    let storage = AttachmentStorage::new(&args.local_storage_path);

    let mut extractor = AttachmentExtractor::new(storage.clone(), Arc::clone(&fetcher));
    match args.dicom_url() {
        Some(url) => {
            let client = DicomWebClient::new(url, args.dicom_credentials(), args.request_timeout())?;
            extractor = extractor.with_dicom(DicomRouter::new(Arc::new(client)));
            info!("DICOM routing enabled via {}", url);
        }
        None => info!("DICOM routing disabled"),
    }

    let walker = Arc::new(BundleWalker::new(Arc::new(extractor)));
    let resolver = EntryResolver::new(fetcher, args.entry_concurrency);

    Ok(Arc::new(DataFlowProcessor::new(
        store,
        resolver,
        walker,
        storage,
        args.entry_concurrency,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_build_processor_with_dicom() {
        let args = Args::parse_from([
            "hiu-dataflow",
            "--dicom-server-url",
            "http://pacs.local:8042",
            "--local-storage-path",
            "/tmp/hiu-test",
        ]);
        assert!(build_processor(&args, Arc::new(MemoryStore::new())).is_ok());
    }
}

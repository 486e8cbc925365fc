//! Background processing of one transaction
//!
//! Loads the stored notification, resolves every entry to plaintext, walks
//! each bundle, persists per-entry results and the transaction's tracked
//! resources, then settles the final status.
//!
//! A transaction is processed by one worker at a time: the store claim moves
//! it to PROCESSING for a lease. Once settled it is never processed again,
//! so redeliveries return the stored status.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use super::ingestor::{EntryResolver, ResolvedEntry};
use crate::attachments::{AttachmentScope, AttachmentStorage};
use crate::db::{DataFlowRequestKeys, DataFlowStore};
use crate::fhir::BundleWalker;
use crate::models::{NotificationPayload, ProcessedEntry, TrackedResourceReference, TransactionStatus};
use crate::types::{DataFlowError, Result};

/// Consent placeholder for attachment paths when no keys were stored
pub const UNASSIGNED_CONSENT: &str = "unassigned";

/// How long a claim keeps other workers away; matches the broker's ack wait
pub const CLAIM_LEASE: Duration = Duration::from_secs(300);

/// Whether a failed fetch or download may still be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Transient failures abort the run so the transaction is retried
    Retryable,
    /// Last chance: every failure is recorded on its entry
    Final,
}

pub struct DataFlowProcessor {
    store: Arc<dyn DataFlowStore>,
    resolver: EntryResolver,
    walker: Arc<BundleWalker>,
    storage: AttachmentStorage,
    entry_concurrency: usize,
    claim_lease: Duration,
}

impl DataFlowProcessor {
    pub fn new(
        store: Arc<dyn DataFlowStore>,
        resolver: EntryResolver,
        walker: Arc<BundleWalker>,
        storage: AttachmentStorage,
        entry_concurrency: usize,
    ) -> Self {
        Self {
            store,
            resolver,
            walker,
            storage,
            entry_concurrency: entry_concurrency.max(1),
            claim_lease: CLAIM_LEASE,
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Process a transaction whose notification has been stored.
    ///
    /// Entry failures are recorded on the entry. An `Err` means the
    /// transaction could not be processed this time; whether that is worth
    /// a retry is decided by [`DataFlowError::is_transient`]. On a
    /// [`Attempt::Retryable`] run a transient fetch or download failure is
    /// such an error, and the key material is kept for the next attempt.
    pub async fn process(&self, transaction_id: &str, attempt: Attempt) -> Result<TransactionStatus> {
        let payload = self
            .store
            .notification(transaction_id)
            .await?
            .ok_or_else(|| {
                DataFlowError::NotFound(format!("No notification for transaction {transaction_id}"))
            })?;

        if let Some(status) = self.store.settled_status(transaction_id).await? {
            info!(transaction_id = %transaction_id, status = %status, "Transaction already settled");
            self.store.remove_request_keys(transaction_id).await?;
            return Ok(status);
        }

        if !self.store.claim(transaction_id, self.claim_lease).await? {
            return Err(DataFlowError::Busy(format!(
                "transaction {transaction_id} is held by another worker"
            )));
        }

        match self.run(transaction_id, &payload, attempt).await {
            Ok(status) => Ok(status),
            Err(e) => {
                // Hand the transaction back for the next delivery
                if let Err(release) = self
                    .store
                    .set_status(transaction_id, TransactionStatus::Received)
                    .await
                {
                    warn!(transaction_id = %transaction_id, error = %release, "Failed to release claim");
                }
                Err(e)
            }
        }
    }

    /// Mark a transaction the workers gave up on as ERRORED. Best effort;
    /// settled transactions keep their status.
    pub async fn abandon(&self, transaction_id: &str) {
        match self.store.status(transaction_id).await {
            Ok(Some(status)) if !status.is_terminal() => {
                match self
                    .store
                    .set_status(transaction_id, TransactionStatus::Errored)
                    .await
                {
                    Ok(()) => warn!(transaction_id = %transaction_id, "Transaction abandoned"),
                    Err(e) => warn!(
                        transaction_id = %transaction_id,
                        error = %e,
                        "Failed to mark abandoned transaction"
                    ),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(transaction_id = %transaction_id, error = %e, "Failed to read status"),
        }
    }

    async fn run(
        &self,
        transaction_id: &str,
        payload: &NotificationPayload,
        attempt: Attempt,
    ) -> Result<TransactionStatus> {
        let keys = self.store.request_keys(transaction_id).await?;
        info!(
            transaction_id = %transaction_id,
            entries = payload.entries.len(),
            attempt = ?attempt,
            "Processing transaction"
        );

        let consent = keys
            .as_ref()
            .map(|k| k.consent_request_id.as_str())
            .unwrap_or(UNASSIGNED_CONSENT);
        let scope = self.storage.scope(consent, transaction_id);

        let processed = match self
            .process_entries(transaction_id, payload, keys.as_ref(), &scope, attempt)
            .await
        {
            Ok(processed) => processed,
            Err(e) => {
                // Nothing references this run's files yet
                self.storage.clear(&scope).await;
                warn!(transaction_id = %transaction_id, error = %e, "Transient failure, will retry");
                return Err(e);
            }
        };

        for entry in &processed {
            self.store
                .put(transaction_id, entry.entry_index, entry)
                .await?;
        }

        let tracked: Vec<TrackedResourceReference> = processed
            .iter()
            .flat_map(|entry| entry.tracked_resources.iter().cloned())
            .collect();
        self.store
            .put_tracked_resources(transaction_id, &tracked)
            .await?;

        let status = TransactionStatus::from_outcomes(processed.iter().map(ProcessedEntry::outcome));
        self.store.set_status(transaction_id, status).await?;

        if keys.is_some() {
            self.store.remove_request_keys(transaction_id).await?;
        }

        info!(
            transaction_id = %transaction_id,
            status = %status,
            tracked = tracked.len(),
            "Transaction processed"
        );
        Ok(status)
    }

    async fn process_entries(
        &self,
        transaction_id: &str,
        payload: &NotificationPayload,
        keys: Option<&DataFlowRequestKeys>,
        scope: &AttachmentScope,
        attempt: Attempt,
    ) -> Result<Vec<ProcessedEntry>> {
        let resolved = self.resolver.resolve_entries(payload, keys).await;
        let results: Vec<Result<ProcessedEntry>> = stream::iter(resolved)
            .map(|entry| self.process_entry(transaction_id, entry, scope, attempt))
            .buffered(self.entry_concurrency)
            .collect()
            .await;
        results.into_iter().collect()
    }

    async fn process_entry(
        &self,
        transaction_id: &str,
        entry: ResolvedEntry,
        scope: &AttachmentScope,
        attempt: Attempt,
    ) -> Result<ProcessedEntry> {
        let retryable = attempt == Attempt::Retryable;
        let text = match entry.outcome {
            Ok(text) => text,
            Err(e) if retryable && e.is_transient() => return Err(e),
            Err(e) => {
                return Ok(ProcessedEntry::errored(
                    transaction_id,
                    entry.index,
                    &entry.media,
                    e.to_string(),
                ))
            }
        };

        match self.walker.walk(&text, scope).await {
            Ok(walk) => {
                if let Some(e) = walk.transient_failure.filter(|_| retryable) {
                    return Err(e);
                }
                Ok(ProcessedEntry {
                    transaction_id: transaction_id.to_string(),
                    entry_index: entry.index,
                    media: entry.media,
                    content: Some(walk.content),
                    errors: walk.errors,
                    tracked_resources: walk.tracked,
                    latest_resource_date: walk.latest_resource_date,
                    document_type: walk.document_type,
                    origins: walk.origins,
                })
            }
            Err(e) => {
                warn!(
                    transaction_id = %transaction_id,
                    entry_index = entry.index,
                    error = %e,
                    "Entry is not a processable bundle"
                );
                Ok(ProcessedEntry::errored(transaction_id, entry.index, &entry.media, e.to_string()))
            }
        }
    }
}

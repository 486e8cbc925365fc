//! Notification ingestion and entry resolution
//!
//! [`NotificationIngestor`] runs on the HTTP path and only validates, stores
//! and signals. [`EntryResolver`] runs in the background pipeline and turns
//! every entry into plaintext, independently of its siblings.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::attachments::RemoteFetcher;
use crate::crypto::{derive_session_key, CryptoError, PayloadDecryptor};
use crate::db::{DataFlowRequestKeys, DataFlowStore};
use crate::models::{Delivery, Entry, NotificationPayload, TransactionStatus};
use crate::nats::{AvailabilityPublisher, DataAvailableMessage};
use crate::types::{DataFlowError, Result};

/// Plaintext (or the reason there is none) of one entry
#[derive(Debug)]
pub struct ResolvedEntry {
    pub index: usize,
    pub media: String,
    pub outcome: Result<String>,
}

pub struct NotificationIngestor {
    store: Arc<dyn DataFlowStore>,
    publisher: Arc<dyn AvailabilityPublisher>,
}

impl NotificationIngestor {
    pub fn new(store: Arc<dyn DataFlowStore>, publisher: Arc<dyn AvailabilityPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Accept a pushed notification.
    ///
    /// A push for a transaction that is being processed or has settled is
    /// a duplicate: it is accepted and dropped, leaving stored results alone.
    pub async fn receive(&self, payload: NotificationPayload) -> Result<()> {
        payload.validate().map_err(DataFlowError::BadRequest)?;

        let transaction_id = payload.transaction_id.clone();
        if self.is_duplicate(&transaction_id).await? {
            info!(transaction_id = %transaction_id, "Duplicate notification ignored");
            return Ok(());
        }

        self.store.save_notification(&payload).await?;
        self.store
            .set_status(&transaction_id, TransactionStatus::Received)
            .await?;
        self.publisher
            .publish(&DataAvailableMessage::new(&transaction_id))
            .await?;

        info!(
            transaction_id = %transaction_id,
            entries = payload.entries.len(),
            "Notification received"
        );
        Ok(())
    }

    async fn is_duplicate(&self, transaction_id: &str) -> Result<bool> {
        match self.store.status(transaction_id).await? {
            Some(TransactionStatus::Processing) => Ok(true),
            Some(status) if status.is_terminal() => {
                Ok(self.store.settled_status(transaction_id).await?.is_some())
            }
            _ => Ok(false),
        }
    }
}

/// Turns entries into plaintext: inline content is decrypted with the
/// transaction's session key, links are fetched
pub struct EntryResolver {
    fetcher: Arc<dyn RemoteFetcher>,
    entry_concurrency: usize,
}

impl EntryResolver {
    pub fn new(fetcher: Arc<dyn RemoteFetcher>, entry_concurrency: usize) -> Self {
        Self {
            fetcher,
            entry_concurrency: entry_concurrency.max(1),
        }
    }

    /// Decrypt or fetch every entry. Results are in entry order.
    pub async fn resolve_entries(
        &self,
        payload: &NotificationPayload,
        keys: Option<&DataFlowRequestKeys>,
    ) -> Vec<ResolvedEntry> {
        // One session key per transaction
        let decryptor = match keys {
            Some(keys) => derive_session_key(&keys.key_material, &payload.sender_key_material)
                .map(PayloadDecryptor::new),
            None => Err(CryptoError::Key(
                "no key material stored for this transaction".into(),
            )),
        };
        if let Err(e) = &decryptor {
            warn!(transaction_id = %payload.transaction_id, error = %e, "Session key unavailable");
        }

        let decryptor = &decryptor;
        stream::iter(payload.entries.iter().cloned().enumerate())
            .map(|(index, entry)| async move {
                let outcome = self.resolve(&entry, decryptor).await;
                if let Err(e) = &outcome {
                    warn!(
                        transaction_id = %payload.transaction_id,
                        entry_index = index,
                        error = %e,
                        "Entry could not be resolved"
                    );
                } else {
                    debug!(transaction_id = %payload.transaction_id, entry_index = index, "Entry resolved");
                }
                ResolvedEntry {
                    index,
                    media: entry.media,
                    outcome,
                }
            })
            .buffered(self.entry_concurrency)
            .collect()
            .await
    }

    async fn resolve(
        &self,
        entry: &Entry,
        decryptor: &std::result::Result<PayloadDecryptor, CryptoError>,
    ) -> Result<String> {
        match entry.delivery() {
            Some(Delivery::Inline(content)) => {
                let decryptor = decryptor.as_ref().map_err(|e| DataFlowError::Crypto(e.clone()))?;
                Ok(decryptor.decrypt(content)?)
            }
            Some(Delivery::Link(url)) => self.fetcher.fetch_text(url).await,
            None => Err(DataFlowError::BadRequest(
                "entry must carry exactly one of content or link".into(),
            )),
        }
    }
}

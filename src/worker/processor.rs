//! Worker processor - NATS JetStream consumer for data-available messages
//!
//! Pulls messages from the data-flow stream and runs the transaction
//! pipeline for each. Acknowledgement follows the outcome:
//! - processed (whatever the final status): `ack`
//! - transient failure with retries left: `nak` with backoff
//! - permanent failure, exhausted retries, undecodable message: `term`

use async_nats::jetstream::{self, consumer::PullConsumer, stream::Stream, AckKind};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use super::{give_up, Disposition, RetryPolicy, TransactionProcessor};
use crate::config::Args;
use crate::nats::{DataAvailableMessage, NatsClient};
use crate::types::{DataFlowError, Result};

/// Durable consumer shared by all worker processes
pub const CONSUMER_NAME: &str = "hiu_dataflow_workers";

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker ID, used in logs
    pub worker_id: String,
    /// Messages fetched per batch
    pub prefetch: usize,
    /// Maximum transactions processed at once
    pub max_concurrent: usize,
    /// How long the broker waits for an ack before redelivering
    pub ack_wait: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: uuid::Uuid::new_v4().to_string(),
            prefetch: 16,
            max_concurrent: 4,
            ack_wait: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            prefetch: args.prefetch,
            max_concurrent: args.worker_count,
            retry: args.retry_policy(),
            ..Default::default()
        }
    }
}

/// Backend worker that processes data-flow transactions from NATS
pub struct Worker {
    config: WorkerConfig,
    nats: NatsClient,
    processor: Arc<dyn TransactionProcessor>,
    semaphore: Arc<Semaphore>,
    running: Arc<RwLock<bool>>,
}

impl Worker {
    pub fn new(config: WorkerConfig, nats: NatsClient, processor: Arc<dyn TransactionProcessor>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            nats,
            processor,
            semaphore,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Run the worker processing loop
    pub async fn run(&self) -> Result<()> {
        *self.running.write().await = true;

        let stream = self.nats.ensure_stream().await?;
        let consumer = self.ensure_consumer(&stream).await?;

        info!(worker_id = %self.config.worker_id, "Worker starting processing loop");

        while *self.running.read().await {
            match self.process_batch(&consumer).await {
                Ok(count) => {
                    if count > 0 {
                        debug!("Dispatched {} messages", count);
                    }
                }
                Err(e) => {
                    error!("Error processing batch: {}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        // Let in-flight transactions finish before returning
        let _ = self
            .semaphore
            .acquire_many(self.config.max_concurrent.max(1) as u32)
            .await;

        info!(worker_id = %self.config.worker_id, "Worker stopped");
        Ok(())
    }

    /// Stop the worker after the current batch
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    async fn ensure_consumer(&self, stream: &Stream) -> Result<PullConsumer> {
        let consumer = stream
            .get_or_create_consumer(
                CONSUMER_NAME,
                jetstream::consumer::pull::Config {
                    durable_name: Some(CONSUMER_NAME.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    ack_wait: self.config.ack_wait,
                    filter_subject: self.nats.subject().to_string(),
                    max_deliver: i64::from(self.config.retry.max_retries()) + 1,
                    max_ack_pending: self.config.prefetch as i64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| DataFlowError::Nats(format!("Failed to create consumer: {e}")))?;

        info!("Using consumer {}", CONSUMER_NAME);
        Ok(consumer)
    }

    async fn process_batch(&self, consumer: &PullConsumer) -> Result<usize> {
        let mut messages = consumer
            .fetch()
            .max_messages(self.config.prefetch)
            .expires(Duration::from_secs(5))
            .messages()
            .await
            .map_err(|e| DataFlowError::Nats(format!("Failed to fetch messages: {e}")))?;

        let mut count = 0;

        while let Some(msg_result) = messages.next().await {
            match msg_result {
                Ok(msg) => {
                    count += 1;
                    let permit = self
                        .semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|_| DataFlowError::Internal("Worker semaphore closed".into()))?;
                    let processor = Arc::clone(&self.processor);
                    let retry = self.config.retry;

                    tokio::spawn(async move {
                        process_message(msg, processor.as_ref(), retry).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    warn!("Error receiving message: {}", e);
                }
            }
        }

        Ok(count)
    }
}

/// Process a single message and settle it with the broker
async fn process_message(msg: jetstream::Message, processor: &dyn TransactionProcessor, retry: RetryPolicy) {
    let message: DataAvailableMessage = match serde_json::from_slice(&msg.payload) {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to parse data-available message: {}", e);
            if let Err(e) = msg.ack_with(AckKind::Term).await {
                warn!("Failed to terminate malformed message: {}", e);
            }
            return;
        }
    };

    let delivered = msg
        .info()
        .map(|info| u32::try_from(info.delivered).unwrap_or(u32::MAX))
        .unwrap_or(1);

    match processor
        .process(&message.transaction_id, retry.attempt(delivered))
        .await
    {
        Ok(status) => {
            debug!(transaction_id = %message.transaction_id, status = %status, "Acknowledging");
            if let Err(e) = msg.ack().await {
                warn!("Failed to ack message: {}", e);
            }
        }
        Err(e) => {
            let ack = match retry.disposition(&e, delivered) {
                Disposition::Retry(delay) => {
                    warn!(
                        transaction_id = %message.transaction_id,
                        delivered,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transaction failed, will retry"
                    );
                    AckKind::Nak(Some(delay))
                }
                Disposition::Terminate => {
                    error!(
                        transaction_id = %message.transaction_id,
                        delivered,
                        error = %e,
                        "Transaction failed permanently"
                    );
                    give_up(processor, &message.transaction_id, &e).await;
                    AckKind::Term
                }
            };
            if let Err(e) = msg.ack_with(ack).await {
                warn!("Failed to settle message: {}", e);
            }
        }
    }
}

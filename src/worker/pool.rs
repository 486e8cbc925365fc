//! In-process worker pool for data-available messages
//!
//! Same processing and retry semantics as the NATS workers, without an
//! external broker. Messages do not survive a restart, so use this for
//! single-node and development deployments only.

use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use super::{give_up, Disposition, RetryPolicy, TransactionProcessor};
use crate::nats::{ChannelPublisher, DataAvailableMessage};

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker tasks
    pub worker_count: usize,
    /// Maximum queued messages
    pub max_queue_size: usize,
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_queue_size: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolMetrics {
    pub processed: usize,
    pub retried: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    retried: AtomicUsize,
    failed: AtomicUsize,
}

struct Shared {
    processor: Arc<dyn TransactionProcessor>,
    retry: RetryPolicy,
    /// Delivery attempts per transaction still in flight
    attempts: DashMap<String, u32>,
    /// Transactions a worker task is running right now
    running: DashSet<String>,
    counters: Counters,
}

/// In-process worker pool fed by a [`ChannelPublisher`]
pub struct WorkerPool {
    sender: mpsc::Sender<DataAvailableMessage>,
    shared: Arc<Shared>,
    worker_count: usize,
}

impl WorkerPool {
    /// Create and start a new worker pool
    pub fn new(config: PoolConfig, processor: Arc<dyn TransactionProcessor>) -> Self {
        let (sender, receiver) = mpsc::channel::<DataAvailableMessage>(config.max_queue_size.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(Shared {
            processor,
            retry: config.retry,
            attempts: DashMap::new(),
            running: DashSet::new(),
            counters: Counters::default(),
        });

        info!("Starting worker pool with {} workers", config.worker_count);

        for i in 0..config.worker_count.max(1) {
            let receiver = Arc::clone(&receiver);
            let shared = Arc::clone(&shared);
            let requeue = sender.downgrade();

            tokio::spawn(async move {
                worker_task(i, receiver, requeue, shared).await;
            });
        }

        Self {
            sender,
            shared,
            worker_count: config.worker_count.max(1),
        }
    }

    /// Publisher that feeds this pool
    pub fn publisher(&self) -> ChannelPublisher {
        ChannelPublisher::new(self.sender.clone())
    }

    pub fn metrics(&self) -> PoolMetrics {
        let counters = &self.shared.counters;
        PoolMetrics {
            processed: counters.processed.load(Ordering::Relaxed),
            retried: counters.retried.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Transactions waiting for another attempt or currently running
    pub fn in_flight(&self) -> usize {
        self.shared.attempts.len()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

/// Worker task that processes messages from the pool
async fn worker_task(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<DataAvailableMessage>>>,
    requeue: mpsc::WeakSender<DataAvailableMessage>,
    shared: Arc<Shared>,
) {
    loop {
        let message = {
            let mut rx = receiver.lock().await;
            match rx.recv().await {
                Some(m) => m,
                None => {
                    info!("Worker {} shutting down (channel closed)", worker_id);
                    return;
                }
            }
        };

        let transaction_id = message.transaction_id.clone();
        if !shared.running.insert(transaction_id.clone()) {
            // Another task has it; look again once that run is likely done
            debug!(worker_id, transaction_id = %transaction_id, "Transaction already running, deferring");
            let delay = shared.retry.backoff(1);
            let requeue = requeue.clone();
            tokio::spawn(async move {
                if let Some(message) = requeue_after(&requeue, message, delay).await {
                    warn!(transaction_id = %message.transaction_id, "Pool closed, dropping deferred message");
                }
            });
            continue;
        }

        let delivered = {
            let mut attempts = shared.attempts.entry(transaction_id.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };

        debug!(worker_id, transaction_id = %transaction_id, delivered, "Processing transaction");

        let result = shared
            .processor
            .process(&transaction_id, shared.retry.attempt(delivered))
            .await;

        match result {
            Ok(_) => {
                shared.attempts.remove(&transaction_id);
                shared.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => match shared.retry.disposition(&e, delivered) {
                Disposition::Retry(delay) => {
                    warn!(
                        transaction_id = %transaction_id,
                        delivered,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transaction failed, will retry"
                    );
                    shared.counters.retried.fetch_add(1, Ordering::Relaxed);

                    let requeue = requeue.clone();
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Some(message) = requeue_after(&requeue, message, delay).await {
                            error!(
                                transaction_id = %message.transaction_id,
                                "Pool closed before retry, dropping transaction"
                            );
                            shared.attempts.remove(&message.transaction_id);
                            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    });
                }
                Disposition::Terminate => {
                    error!(
                        transaction_id = %transaction_id,
                        delivered,
                        error = %e,
                        "Transaction failed permanently"
                    );
                    give_up(shared.processor.as_ref(), &transaction_id, &e).await;
                    shared.attempts.remove(&transaction_id);
                    shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            },
        }

        shared.running.remove(&transaction_id);
    }
}

/// Put a message back on the queue after `delay`. Hands the message back
/// when the pool has shut down in the meantime.
async fn requeue_after(
    requeue: &mpsc::WeakSender<DataAvailableMessage>,
    message: DataAvailableMessage,
    delay: Duration,
) -> Option<DataAvailableMessage> {
    tokio::time::sleep(delay).await;
    match requeue.upgrade() {
        Some(sender) => sender.send(message).await.err().map(|e| e.0),
        None => Some(message),
    }
}

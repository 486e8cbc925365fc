//! Worker module - background processing of data-available signals
//!
//! Provides two modes:
//! - **NATS mode**: JetStream pull consumers, shared by any number of
//!   worker processes
//! - **Pool mode**: in-process tasks fed by a channel (single node, dev)
//!
//! Both modes share the same [`RetryPolicy`].

pub mod pool;
pub mod processor;

use std::time::Duration;

pub use pool::{PoolConfig, PoolMetrics, WorkerPool};
pub use processor::{Worker, WorkerConfig, CONSUMER_NAME};

use async_trait::async_trait;

use crate::models::TransactionStatus;
use crate::services::{Attempt, DataFlowProcessor};
use crate::types::{DataFlowError, Result};

/// Runs one transaction; implemented by the data-flow pipeline
#[async_trait]
pub trait TransactionProcessor: Send + Sync {
    async fn process(&self, transaction_id: &str, attempt: Attempt) -> Result<TransactionStatus>;

    /// Called once a message for the transaction has been given up on
    async fn abandon(&self, transaction_id: &str);
}

#[async_trait]
impl TransactionProcessor for DataFlowProcessor {
    async fn process(&self, transaction_id: &str, attempt: Attempt) -> Result<TransactionStatus> {
        DataFlowProcessor::process(self, transaction_id, attempt).await
    }

    async fn abandon(&self, transaction_id: &str) {
        DataFlowProcessor::abandon(self, transaction_id).await
    }
}

/// Settle a terminated message. A busy transaction belongs to another
/// worker, so its status is left alone.
pub(crate) async fn give_up(processor: &dyn TransactionProcessor, transaction_id: &str, error: &DataFlowError) {
    if !matches!(error, DataFlowError::Busy(_)) {
        processor.abandon(transaction_id).await;
    }
}

/// Upper bound for a single redelivery delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// What to do with a message whose processing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Redeliver after the given delay
    Retry(Duration),
    /// Drop the message for good
    Terminate,
}

/// Bounded exponential backoff for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(2))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the next attempt, `delivered` being the number of
    /// attempts so far (1 for the first delivery)
    pub fn backoff(&self, delivered: u32) -> Duration {
        let exponent = delivered.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exponent)
            .min(MAX_BACKOFF)
    }

    /// Whether attempt number `delivered` is the last one the policy allows
    pub fn attempt(&self, delivered: u32) -> Attempt {
        if delivered > self.max_retries {
            Attempt::Final
        } else {
            Attempt::Retryable
        }
    }

    /// Decide between retry and termination after a failed attempt
    pub fn disposition(&self, error: &DataFlowError, delivered: u32) -> Disposition {
        if !error.is_transient() || delivered > self.max_retries {
            Disposition::Terminate
        } else {
            Disposition::Retry(self.backoff(delivered))
        }
    }
}

//! Publishing data-available signals

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::client::NatsClient;
use super::messages::DataAvailableMessage;
use crate::types::{DataFlowError, Result};

/// Queue handoff between ingestion and processing
#[async_trait]
pub trait AvailabilityPublisher: Send + Sync {
    async fn publish(&self, message: &DataAvailableMessage) -> Result<()>;
}

/// Publishes to the JetStream data-flow subject and waits for the broker ack
pub struct JetStreamPublisher {
    nats: NatsClient,
}

impl JetStreamPublisher {
    pub async fn new(nats: NatsClient) -> Result<Self> {
        nats.ensure_stream().await?;
        Ok(Self { nats })
    }
}

#[async_trait]
impl AvailabilityPublisher for JetStreamPublisher {
    async fn publish(&self, message: &DataAvailableMessage) -> Result<()> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| DataFlowError::Internal(format!("Failed to encode message: {e}")))?;

        self.nats
            .jetstream()
            .publish(self.nats.subject().to_string(), payload.into())
            .await
            .map_err(|e| DataFlowError::Nats(format!("Publish failed: {e}")))?
            .await
            .map_err(|e| DataFlowError::Nats(format!("Publish not acknowledged: {e}")))?;

        debug!(transaction_id = %message.transaction_id, "Published data-available message");
        Ok(())
    }
}

/// Hands messages to the in-process worker pool
#[derive(Clone)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<DataAvailableMessage>,
}

impl ChannelPublisher {
    pub fn new(sender: mpsc::Sender<DataAvailableMessage>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl AvailabilityPublisher for ChannelPublisher {
    async fn publish(&self, message: &DataAvailableMessage) -> Result<()> {
        self.sender
            .send(message.clone())
            .await
            .map_err(|_| DataFlowError::Internal("Worker pool closed".into()))
    }
}

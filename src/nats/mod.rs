//! NATS JetStream integration: the queue between ingestion and processing

pub mod client;
pub mod messages;
pub mod publisher;

pub use client::NatsClient;
pub use messages::DataAvailableMessage;
pub use publisher::{AvailabilityPublisher, ChannelPublisher, JetStreamPublisher};

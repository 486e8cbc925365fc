//! NATS JetStream client wrapper

use async_nats::jetstream::{self, stream::Stream};
use async_nats::{Client, ConnectOptions};
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::{DataFlowError, Result};

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// How long unprocessed data-available messages are kept
const STREAM_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 3600);

/// NATS client wrapper with JetStream support
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
    jetstream: jetstream::Context,
    stream_name: String,
    subject: String,
}

impl NatsClient {
    /// Connect to NATS
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        // No retry on the initial connect: dev mode falls back to the
        // in-process pool when NATS is missing.
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| DataFlowError::Nats(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        let jetstream = jetstream::new(client.clone());
        Ok(Self {
            client,
            jetstream,
            stream_name: args.nats_stream.clone(),
            subject: args.nats_subject.clone(),
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Ensure the data-flow stream exists. File storage: a message must
    /// survive a broker restart until some worker acknowledged it.
    pub async fn ensure_stream(&self) -> Result<Stream> {
        let stream = self
            .jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: self.stream_name.clone(),
                subjects: vec![self.subject.clone()],
                max_age: STREAM_MAX_AGE,
                storage: jetstream::stream::StorageType::File,
                retention: jetstream::stream::RetentionPolicy::WorkQueue,
                ..Default::default()
            })
            .await
            .map_err(|e| DataFlowError::Nats(format!("Failed to create stream: {e}")))?;

        info!(stream = %self.stream_name, subject = %self.subject, "Using JetStream stream");
        Ok(stream)
    }
}

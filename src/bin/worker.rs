//! HIU data-flow worker - standalone consumer of data-available messages
//!
//! Run any number of these next to the service to scale processing. They
//! share one durable JetStream consumer, so each transaction is processed
//! by one worker at a time.
//!
//! Usage:
//!   hiu-dataflow-worker --nats-url nats://localhost:4222 --mongodb-uri mongodb://localhost:27017
//!
//! Reads the same environment variables as the service.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use hiu_dataflow::{
    config::Args,
    logging,
    nats::NatsClient,
    services,
    worker::{Worker, WorkerConfig},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init_tracing(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let (store, backend) = services::connect_store(&args).await?;
    let processor = services::build_processor(&args, store)?;
    let nats = NatsClient::new(&args.nats, "hiu-dataflow-worker").await?;

    let config = WorkerConfig::from_args(&args);
    info!(
        "Starting worker {} (NATS: {}, store: {})",
        config.worker_id, args.nats.nats_url, backend
    );

    let worker = Arc::new(Worker::new(config, nats, processor));
    let runner = Arc::clone(&worker);
    let mut worker_handle = tokio::spawn(async move { runner.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            worker.stop().await;
            match worker_handle.await {
                Ok(Err(e)) => error!("Worker error: {}", e),
                Err(e) => error!("Worker task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        result = &mut worker_handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Worker error: {}", e);
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("Worker task error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    info!("Worker shutting down");
    Ok(())
}

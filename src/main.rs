//! HIU data-flow service
//!
//! Serves the notification, key-material and status endpoints and runs
//! transaction processing, either through an embedded NATS worker or an
//! in-process worker pool.

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use hiu_dataflow::{
    config::Args,
    crypto::KeyMaterialGenerator,
    logging,
    nats::{AvailabilityPublisher, JetStreamPublisher, NatsClient},
    server::{self, AppState},
    services::{self, DataFlowRequestService, NotificationIngestor},
    worker::{PoolConfig, Worker, WorkerConfig, WorkerPool},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    logging::init_tracing(&args.log_level, args.log_json);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  HIU data-flow service");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("NATS: {}", args.nats.nats_url);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Attachments: {}", args.local_storage_path.display());
    info!("Workers: {}", args.worker_count);
    info!("======================================");

    let (store, store_backend) = match services::connect_store(&args).await {
        Ok(connected) => connected,
        Err(_) => std::process::exit(1),
    };
    let processor = services::build_processor(&args, Arc::clone(&store))?;

    // Connect to NATS (optional in dev mode)
    let nats = match NatsClient::new(&args.nats, "hiu-dataflow").await {
        Ok(client) => Some(client),
        Err(e) => {
            if args.dev_mode {
                warn!("NATS connection failed (dev mode, using in-process workers): {}", e);
                None
            } else {
                error!("NATS connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let mut pool = None;
    let mut embedded_worker = None;
    let publisher: Arc<dyn AvailabilityPublisher> = match nats {
        Some(nats) => {
            let publisher = JetStreamPublisher::new(nats.clone()).await?;
            let worker = Worker::new(WorkerConfig::from_args(&args), nats, processor);
            embedded_worker = Some(Arc::new(worker));
            Arc::new(publisher)
        }
        None => {
            let config = PoolConfig {
                worker_count: args.worker_count,
                retry: args.retry_policy(),
                ..Default::default()
            };
            let worker_pool = Arc::new(WorkerPool::new(config, processor));
            let publisher = worker_pool.publisher();
            pool = Some(worker_pool);
            Arc::new(publisher)
        }
    };

    let ingestor = Arc::new(NotificationIngestor::new(Arc::clone(&store), publisher));
    let requests = Arc::new(DataFlowRequestService::new(
        Arc::clone(&store),
        KeyMaterialGenerator::new(args.key_lifetime()),
    ));

    let mut state = AppState::new(args, store, ingestor, requests).with_store_backend(store_backend);
    if let Some(pool) = pool {
        state = state.with_pool(pool);
    }
    let state = Arc::new(state);

    if let Some(worker) = embedded_worker.clone() {
        tokio::spawn(async move {
            if let Err(e) = worker.run().await {
                error!("Embedded worker stopped: {}", e);
            }
        });
    }

    tokio::select! {
        result = server::run(state) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    if let Some(worker) = embedded_worker {
        worker.stop().await;
    }
    info!("HIU data-flow service shutting down");
    Ok(())
}

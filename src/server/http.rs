//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::config::Args;
use crate::db::DataFlowStore;
use crate::routes;
use crate::services::{DataFlowRequestService, NotificationIngestor};
use crate::types::DataFlowError;
use crate::worker::WorkerPool;

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub store: Arc<dyn DataFlowStore>,
    /// Which store implementation backs `store`, for health output
    pub store_backend: &'static str,
    pub ingestor: Arc<NotificationIngestor>,
    pub requests: Arc<DataFlowRequestService>,
    /// In-process workers when running without NATS
    pub pool: Option<Arc<WorkerPool>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        store: Arc<dyn DataFlowStore>,
        ingestor: Arc<NotificationIngestor>,
        requests: Arc<DataFlowRequestService>,
    ) -> Self {
        Self {
            args,
            store,
            store_backend: "memory",
            ingestor,
            requests,
            pool: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_store_backend(mut self, backend: &'static str) -> Self {
        self.store_backend = backend;
        self
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), DataFlowError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("HIU data-flow service listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled - in-memory fallbacks allowed");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request<B>(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, hyper::Error>
where
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => routes::health_check(state),

        (&Method::POST, "/data/notification") => routes::handle_notification(state, req).await,

        (&Method::POST, "/data-flow/key-material") => routes::handle_key_material(state, req).await,

        (&Method::GET, _) => match routes::match_status_path(&path) {
            Some(transaction_id) => routes::handle_transaction_status(state, &transaction_id).await,
            None => not_found_response(&path),
        },

        _ => not_found_response(&path),
    };

    info!("[{}] {} {} -> {}", addr, method, path, response.status().as_u16());
    Ok(response)
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    routes::json_response(StatusCode::NOT_FOUND, &body)
}

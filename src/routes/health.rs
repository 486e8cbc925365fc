//! Health check endpoints
//!
//! /health and /healthz are liveness checks: 200 while the process serves
//! requests. The body describes which backends are in use.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::json_response;
use crate::server::AppState;
use crate::worker::PoolMetrics;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    pub timestamp: String,
    /// "development" or "production"
    pub mode: &'static str,
    /// "mongodb" or "memory"
    pub store: &'static str,
    /// "nats" or "pool"
    pub queue: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolMetrics>,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        store: state.store_backend,
        queue: if state.pool.is_some() { "pool" } else { "nats" },
        pool: state.pool.as_ref().map(|pool| pool.metrics()),
    }
}

pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &build_health_response(&state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{body_json, state};

    #[tokio::test]
    async fn test_health_reports_backends() {
        let (state, _store, _rx) = state();
        let response = health_check(state);
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["healthy"], true);
        assert_eq!(json["store"], "memory");
        assert_eq!(json["mode"], "production");
    }
}

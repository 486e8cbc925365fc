//! HTTP routes for the data-flow service

pub mod health;
pub mod key_material;
pub mod notification;
pub mod status;

pub use health::health_check;
pub use key_material::handle_key_material;
pub use notification::handle_notification;
pub use status::{handle_transaction_status, match_status_path};

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::DataFlowError;

/// Largest request body accepted; inline entries make notifications large
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(json) => Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .header("Cache-Control", "no-store")
            .body(Full::new(Bytes::from(json)))
            .unwrap_or_else(|_| internal_error()),
        Err(_) => internal_error(),
    }
}

/// Map a service error onto its HTTP status
pub(crate) fn error_response(err: DataFlowError) -> Response<Full<Bytes>> {
    let (status, message) = err.into_status_code_and_body();
    json_response(
        status,
        &ErrorBody {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
        },
    )
}

fn internal_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(b"Failed to build response")));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// Read a bounded JSON request body
pub(crate) async fn read_json<T, B>(body: B) -> Result<T, DataFlowError>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let bytes = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| DataFlowError::BadRequest(format!("Failed to read body: {e}")))?
        .to_bytes();

    serde_json::from_slice(&bytes)
        .map_err(|e| DataFlowError::BadRequest(format!("Invalid JSON body: {e}")))
}

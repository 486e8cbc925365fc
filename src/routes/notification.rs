//! POST /data/notification - HIP pushes health information

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use super::{error_response, json_response, read_json};
use crate::models::{NotificationPayload, TransactionStatus};
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    transaction_id: String,
    status: TransactionStatus,
}

/// Accept a push and queue it for processing. Answers 202 once the
/// notification is stored; decryption happens in the background.
pub async fn handle_notification<B>(state: Arc<AppState>, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let payload: NotificationPayload = match read_json(req.into_body()).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Rejected notification");
            return error_response(e);
        }
    };
    let transaction_id = payload.transaction_id.clone();

    match state.ingestor.receive(payload).await {
        Ok(()) => json_response(
            StatusCode::ACCEPTED,
            &Accepted {
                transaction_id,
                status: TransactionStatus::Received,
            },
        ),
        Err(e) => {
            warn!(transaction_id = %transaction_id, error = %e, "Notification not accepted");
            error_response(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyMaterialGenerator;
    use crate::db::DataFlowStore;
    use crate::routes::test_support::{body_json, state};

    fn request(body: String) -> Request<Full<Bytes>> {
        Request::post("/data/notification")
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_accepts_notification() {
        let (state, store, mut rx) = state();
        let (_, wire) = KeyMaterialGenerator::default().generate();
        let body = serde_json::json!({
            "transactionId": "t1",
            "entries": [{"content": "YWJj", "media": "application/fhir+json", "checksum": ""}],
            "keyMaterial": wire,
        });

        let response = handle_notification(state, request(body.to_string())).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let json = body_json(response).await;
        assert_eq!(json["status"], "RECEIVED");

        assert_eq!(store.status("t1").await.unwrap(), Some(TransactionStatus::Received));
        assert_eq!(rx.recv().await.unwrap().transaction_id, "t1");
    }

    #[tokio::test]
    async fn test_rejects_malformed_body() {
        let (state, _store, _rx) = state();
        let response = handle_notification(state, request("{not json".into())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejects_notification_without_entries() {
        let (state, store, _rx) = state();
        let (_, wire) = KeyMaterialGenerator::default().generate();
        let body = serde_json::json!({"transactionId": "t1", "entries": [], "keyMaterial": wire});

        let response = handle_notification(state, request(body.to_string())).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.status("t1").await.unwrap().is_none());
    }
}

//! POST /data-flow/key-material - keys for an outgoing data-flow request

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{error_response, json_response, read_json};
use crate::models::KeyMaterial;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyMaterialRequest {
    pub transaction_id: String,
    pub consent_request_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyMaterialResponse {
    transaction_id: String,
    key_material: KeyMaterial,
}

pub async fn handle_key_material<B>(state: Arc<AppState>, req: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let request: KeyMaterialRequest = match read_json(req.into_body()).await {
        Ok(r) => r,
        Err(e) => return error_response(e),
    };

    match state
        .requests
        .prepare(&request.transaction_id, &request.consent_request_id)
        .await
    {
        Ok(key_material) => json_response(
            StatusCode::OK,
            &KeyMaterialResponse {
                transaction_id: request.transaction_id,
                key_material,
            },
        ),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DataFlowStore;
    use crate::routes::test_support::{body_json, state};

    #[tokio::test]
    async fn test_returns_public_half() {
        let (state, store, _rx) = state();
        let req = Request::post("/data-flow/key-material")
            .body(Full::new(Bytes::from(
                r#"{"transactionId": "t1", "consentRequestId": "c1"}"#,
            )))
            .unwrap();

        let response = handle_key_material(state, req).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["transactionId"], "t1");
        assert_eq!(json["keyMaterial"]["curve"], "curve25519");
        assert!(json["keyMaterial"]["dhPublicKey"]["keyValue"].is_string());
        assert!(store.request_keys("t1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_fields_rejected() {
        let (state, _store, _rx) = state();
        let req = Request::post("/data-flow/key-material")
            .body(Full::new(Bytes::from(r#"{"transactionId": "t1"}"#)))
            .unwrap();

        let response = handle_key_material(state, req).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

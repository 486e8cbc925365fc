//! GET /data-flow/{transactionId}/status - processing progress of a transaction

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::{error_response, json_response};
use crate::models::{DocumentType, EntryOutcome, ProcessedEntry, TrackedResourceReference, TransactionStatus};
use crate::server::AppState;
use crate::types::{DataFlowError, Result};

const STATUS_PREFIX: &str = "/data-flow/";
const STATUS_SUFFIX: &str = "/status";

/// Extract the transaction id from a status path
pub fn match_status_path(path: &str) -> Option<String> {
    let id = path.strip_prefix(STATUS_PREFIX)?.strip_suffix(STATUS_SUFFIX)?;
    if id.is_empty() || id.contains('/') {
        return None;
    }
    urlencoding::decode(id).ok().map(|s| s.into_owned())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntrySummary {
    entry_index: usize,
    outcome: EntryOutcome,
    document_type: DocumentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    latest_resource_date: Option<DateTime<Utc>>,
    origins: Vec<String>,
    errors: Vec<String>,
}

impl From<&ProcessedEntry> for EntrySummary {
    fn from(entry: &ProcessedEntry) -> Self {
        Self {
            entry_index: entry.entry_index,
            outcome: entry.outcome(),
            document_type: entry.document_type,
            latest_resource_date: entry.latest_resource_date,
            origins: entry.origins.clone(),
            errors: entry.errors.clone(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    transaction_id: String,
    status: TransactionStatus,
    entries: Vec<EntrySummary>,
    tracked_resources: Vec<TrackedResourceReference>,
}

async fn build_status(state: &AppState, transaction_id: &str) -> Result<StatusResponse> {
    let status = state
        .store
        .status(transaction_id)
        .await?
        .ok_or_else(|| DataFlowError::NotFound(format!("Unknown transaction {transaction_id}")))?;
    let entries = state.store.entries(transaction_id).await?;
    let tracked_resources = state.store.tracked_resources(transaction_id).await?;

    Ok(StatusResponse {
        transaction_id: transaction_id.to_string(),
        status,
        entries: entries.iter().map(EntrySummary::from).collect(),
        tracked_resources,
    })
}

pub async fn handle_transaction_status(state: Arc<AppState>, transaction_id: &str) -> Response<Full<Bytes>> {
    match build_status(&state, transaction_id).await {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(e) => error_response(e),
    }
}

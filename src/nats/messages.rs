//! Messages exchanged over the data-flow queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Signals that a transaction's notification is stored and ready to process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAvailableMessage {
    pub transaction_id: String,
    pub published_at: DateTime<Utc>,
}

impl DataAvailableMessage {
    pub fn new(transaction_id: &str) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            published_at: Utc::now(),
        }
    }
}

//! Error types for the data-flow service
//!
//! Mirrors the gateway error pattern: one enum, string payloads, and an
//! HTTP status mapping for the ingestion surface.

use hyper::StatusCode;

use crate::crypto::CryptoError;

/// Main error type for data-flow operations
#[derive(Debug, thiserror::Error)]
pub enum DataFlowError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("FHIR parse error: {0}")]
    Parse(String),

    #[error("Attachment error: {0}")]
    Attachment(String),

    #[error("DICOM server error: {0}")]
    Dicom(String),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// The remote end answered, but refused or cannot serve the content
    #[error("Remote rejected request: {0}")]
    Rejected(String),

    /// Another worker currently holds the transaction
    #[error("Transaction busy: {0}")]
    Busy(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataFlowError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Crypto(_) => StatusCode::BAD_REQUEST,
            Self::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Attachment(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Dicom(_) => StatusCode::BAD_GATEWAY,
            Self::Nats(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Rejected(_) => StatusCode::BAD_GATEWAY,
            Self::Busy(_) => StatusCode::CONFLICT,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a retry of the same work can reasonably succeed.
    ///
    /// Used by the workers to choose between a delayed redelivery and
    /// terminating the message.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Nats(_) | Self::Database(_) | Self::Http(_) | Self::Io(_) | Self::Busy(_)
        )
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for DataFlowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DataFlowError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for DataFlowError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for DataFlowError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<async_nats::Error> for DataFlowError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

impl From<mongodb::error::Error> for DataFlowError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for data-flow operations
pub type Result<T> = std::result::Result<T, DataFlowError>;

//! Configuration for the HIU data-flow service
//!
//! CLI arguments and environment variable handling using clap. Both the
//! service and the standalone worker read the same arguments.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::dicom::DicomCredentials;
use crate::worker::RetryPolicy;

/// HIU data-flow service: receives pushed health information, decrypts it
/// and indexes the FHIR content
#[derive(Parser, Debug, Clone)]
#[command(name = "hiu-dataflow")]
#[command(about = "Health information ingestion and processing for a HIU")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8003")]
    pub listen: SocketAddr,

    /// Development mode: fall back to in-memory storage and in-process
    /// workers when MongoDB or NATS are unavailable
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "hiu_dataflow")]
    pub mongodb_db: String,

    /// Root directory for extracted attachments
    #[arg(long, env = "LOCAL_STORAGE_PATH", default_value = "/tmp/hiu/attachments")]
    pub local_storage_path: PathBuf,

    /// DICOM web server base URL; empty disables DICOM routing
    #[arg(long, env = "DICOM_SERVER_URL")]
    pub dicom_server_url: Option<String>,

    #[arg(long, env = "DICOM_SERVER_USER")]
    pub dicom_server_user: Option<String>,

    #[arg(long, env = "DICOM_SERVER_PASSWORD")]
    pub dicom_server_password: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Transactions processed concurrently per process
    #[arg(long, env = "WORKER_COUNT", default_value = "4")]
    pub worker_count: usize,

    /// Unacknowledged messages a worker may hold
    #[arg(long, env = "PREFETCH", default_value = "16")]
    pub prefetch: usize,

    /// Redeliveries of a transiently failing transaction before giving up
    #[arg(long, env = "MAX_RETRIES", default_value = "5")]
    pub max_retries: u32,

    /// Base delay for exponential redelivery backoff
    #[arg(long, env = "RETRY_BACKOFF_MS", default_value = "2000")]
    pub retry_backoff_ms: u64,

    /// Timeout for outbound HTTP (linked content, DICOM server)
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Entries of one transaction processed concurrently
    #[arg(long, env = "ENTRY_CONCURRENCY", default_value = "4")]
    pub entry_concurrency: usize,

    /// Lifetime advertised for generated key material
    #[arg(long, env = "KEY_EXPIRY_HOURS", default_value = "24")]
    pub key_expiry_hours: i64,
}

/// NATS configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,

    /// JetStream stream holding data-available messages
    #[arg(long, env = "NATS_STREAM", default_value = "HIU_DATA_FLOW")]
    pub nats_stream: String,

    /// Subject data-available messages are published on
    #[arg(long, env = "NATS_SUBJECT", default_value = "hiu.dataflow.available")]
    pub nats_subject: String,
}

impl Args {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_backoff_ms))
    }

    pub fn key_lifetime(&self) -> chrono::Duration {
        chrono::Duration::hours(self.key_expiry_hours)
    }

    /// DICOM base URL, if routing is enabled
    pub fn dicom_url(&self) -> Option<&str> {
        self.dicom_server_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    pub fn dicom_credentials(&self) -> Option<DicomCredentials> {
        match (&self.dicom_server_user, &self.dicom_server_password) {
            (Some(user), Some(password)) => Some(DicomCredentials {
                user: user.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.nats.nats_stream.trim().is_empty() {
            return Err("NATS_STREAM must not be empty".to_string());
        }
        if self.nats.nats_subject.trim().is_empty() {
            return Err("NATS_SUBJECT must not be empty".to_string());
        }
        if self.local_storage_path.as_os_str().is_empty() {
            return Err("LOCAL_STORAGE_PATH must not be empty".to_string());
        }
        if self.dicom_server_user.is_some() != self.dicom_server_password.is_some() {
            return Err(
                "DICOM_SERVER_USER and DICOM_SERVER_PASSWORD must be set together".to_string(),
            );
        }
        if self.worker_count == 0 {
            return Err("WORKER_COUNT must be at least 1".to_string());
        }
        if self.prefetch == 0 {
            return Err("PREFETCH must be at least 1".to_string());
        }
        if self.entry_concurrency == 0 {
            return Err("ENTRY_CONCURRENCY must be at least 1".to_string());
        }
        if self.key_expiry_hours <= 0 {
            return Err("KEY_EXPIRY_HOURS must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["hiu-dataflow"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert_eq!(args.nats.nats_subject, "hiu.dataflow.available");
        assert!(args.dicom_url().is_none());
    }

    #[test]
    fn test_validation_failures() {
        assert!(parse(&["--worker-count", "0"]).validate().is_err());
        assert!(parse(&["--prefetch", "0"]).validate().is_err());
        assert!(parse(&["--nats-stream", ""]).validate().is_err());
        assert!(parse(&["--dicom-server-user", "orthanc"]).validate().is_err());
    }

    #[test]
    fn test_dicom_settings() {
        let args = parse(&[
            "--dicom-server-url",
            "http://orthanc:8042",
            "--dicom-server-user",
            "u",
            "--dicom-server-password",
            "p",
        ]);
        assert!(args.validate().is_ok());
        assert_eq!(args.dicom_url(), Some("http://orthanc:8042"));
        assert_eq!(args.dicom_credentials().unwrap().user, "u");

        assert!(parse(&["--dicom-server-url", " "]).dicom_url().is_none());
    }
}

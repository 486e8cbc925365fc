//! DICOM web server client
//!
//! Speaks the subset of the Orthanc REST contract the router needs: upload
//! an instance, then look up the study it landed in.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{DataFlowError, Result};

/// Response of `POST /instances`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ParentStudy")]
    pub parent_study: String,
    #[serde(rename = "Status", default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MainDicomTags {
    #[serde(rename = "StudyInstanceUID")]
    pub study_instance_uid: String,
}

/// Response of `GET /studies/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyDescriptor {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(rename = "MainDicomTags")]
    pub main_dicom_tags: MainDicomTags,
}

/// External DICOM store
#[async_trait]
pub trait DicomClient: Send + Sync {
    async fn upload_instance(&self, bytes: Vec<u8>) -> Result<InstanceDescriptor>;

    async fn study(&self, study_id: &str) -> Result<StudyDescriptor>;
}

/// HTTP Basic credentials
#[derive(Clone)]
pub struct DicomCredentials {
    pub user: String,
    pub password: String,
}

impl std::fmt::Debug for DicomCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DicomCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// reqwest implementation of [`DicomClient`]
pub struct DicomWebClient {
    base_url: String,
    credentials: Option<DicomCredentials>,
    http_client: reqwest::Client,
}

impl DicomWebClient {
    pub fn new(
        base_url: &str,
        credentials: Option<DicomCredentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataFlowError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            Some(c) => request.basic_auth(&c.user, Some(&c.password)),
            None => request,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        if !response.status().is_success() {
            return Err(DataFlowError::Dicom(format!(
                "{what} returned HTTP {}",
                response.status()
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| DataFlowError::Dicom(format!("Invalid {what} response: {e}")))
    }
}

#[async_trait]
impl DicomClient for DicomWebClient {
    async fn upload_instance(&self, bytes: Vec<u8>) -> Result<InstanceDescriptor> {
        let url = format!("{}/instances", self.base_url);
        let size = bytes.len();
        let response = self
            .authorize(self.http_client.post(&url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| DataFlowError::Dicom(format!("Upload failed: {e}")))?;

        let instance: InstanceDescriptor = Self::read_json(response, "instance upload").await?;
        debug!(instance = %instance.id, study = %instance.parent_study, size, "Uploaded DICOM instance");
        Ok(instance)
    }

    async fn study(&self, study_id: &str) -> Result<StudyDescriptor> {
        let url = format!("{}/studies/{}", self.base_url, urlencoding::encode(study_id));
        let response = self
            .authorize(self.http_client.get(&url))
            .send()
            .await
            .map_err(|e| DataFlowError::Dicom(format!("Study lookup failed: {e}")))?;

        Self::read_json(response, "study lookup").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_parsing() {
        let instance: InstanceDescriptor = serde_json::from_str(
            r#"{"ID":"a1b2","ParentPatient":"p","ParentSeries":"s","ParentStudy":"st-9","Path":"/instances/a1b2","Status":"Success"}"#,
        )
        .unwrap();
        assert_eq!(instance.parent_study, "st-9");
        assert_eq!(instance.status.as_deref(), Some("Success"));

        let study: StudyDescriptor = serde_json::from_str(
            r#"{"ID":"st-9","MainDicomTags":{"StudyInstanceUID":"1.2.840.113619.2.1","StudyDate":"20230105"}}"#,
        )
        .unwrap();
        assert_eq!(study.main_dicom_tags.study_instance_uid, "1.2.840.113619.2.1");
    }

    #[test]
    fn test_base_url_normalized_and_password_redacted() {
        let client = DicomWebClient::new(
            "http://orthanc:8042/",
            Some(DicomCredentials {
                user: "hiu".into(),
                password: "secret".into(),
            }),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://orthanc:8042");
        assert!(!format!("{:?}", client.credentials).contains("secret"));
    }
}

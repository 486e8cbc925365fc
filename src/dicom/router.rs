//! Hands radiology DICOM attachments to the DICOM server

use std::sync::Arc;

use tracing::{info, warn};

use super::client::DicomClient;
use crate::attachments::SavedAttachment;
use crate::types::Result;

/// Public path prefix of studies served through the DICOM proxy
pub const STUDY_PREFIX: &str = "/dicom-server/studies/";

pub struct DicomRouter {
    client: Arc<dyn DicomClient>,
}

impl DicomRouter {
    pub fn new(client: Arc<dyn DicomClient>) -> Self {
        Self { client }
    }

    /// Only DICOM files of radiology reports are routed
    pub fn should_route(saved: &SavedAttachment, radiology: bool) -> bool {
        radiology && saved.is_dicom()
    }

    /// Upload a saved attachment and return its study reference.
    ///
    /// Returns `None` when the attachment is not eligible or the upload
    /// failed; failures are logged and the local reference stays valid.
    pub async fn route(&self, saved: &SavedAttachment, radiology: bool) -> Option<String> {
        if !Self::should_route(saved, radiology) {
            return None;
        }

        match self.upload(saved).await {
            Ok(uid) => {
                info!(file = %saved.file_name, study = %uid, "Routed attachment to DICOM server");
                Some(format!("{STUDY_PREFIX}{uid}"))
            }
            Err(e) => {
                warn!(file = %saved.file_name, error = %e, "DICOM upload failed, keeping local reference");
                None
            }
        }
    }

    async fn upload(&self, saved: &SavedAttachment) -> Result<String> {
        let bytes = tokio::fs::read(&saved.path).await?;
        let instance = self.client.upload_instance(bytes).await?;
        let study = self.client.study(&instance.parent_study).await?;
        Ok(study.main_dicom_tags.study_instance_uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::client::{InstanceDescriptor, MainDicomTags, StudyDescriptor};
    use crate::types::DataFlowError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct MockDicom {
        uploads: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl DicomClient for MockDicom {
        async fn upload_instance(&self, _bytes: Vec<u8>) -> Result<InstanceDescriptor> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(DataFlowError::Dicom("connection refused".into()));
            }
            Ok(InstanceDescriptor {
                id: "inst".into(),
                parent_study: "study-1".into(),
                status: None,
            })
        }

        async fn study(&self, study_id: &str) -> Result<StudyDescriptor> {
            Ok(StudyDescriptor {
                id: study_id.to_string(),
                main_dicom_tags: MainDicomTags {
                    study_instance_uid: "1.2.3.4".into(),
                },
            })
        }
    }

    async fn saved(dir: &TempDir, name: &str) -> SavedAttachment {
        let path = dir.path().join(name);
        tokio::fs::write(&path, b"DICM").await.unwrap();
        SavedAttachment {
            file_name: name.to_string(),
            path,
            media: "application/dicom".into(),
            size_bytes: 4,
        }
    }

    #[tokio::test]
    async fn test_routes_radiology_dicom() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockDicom { uploads: AtomicUsize::new(0), fail: false });
        let router = DicomRouter::new(mock.clone());

        let reference = router.route(&saved(&dir, "a.dcm").await, true).await;
        assert_eq!(reference.as_deref(), Some("/dicom-server/studies/1.2.3.4"));
        assert_eq!(mock.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gating() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockDicom { uploads: AtomicUsize::new(0), fail: false });
        let router = DicomRouter::new(mock.clone());

        assert!(router.route(&saved(&dir, "a.png").await, true).await.is_none());
        assert!(router.route(&saved(&dir, "b.dcm").await, false).await.is_none());
        assert_eq!(mock.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_is_non_fatal() {
        let dir = TempDir::new().unwrap();
        let mock = Arc::new(MockDicom { uploads: AtomicUsize::new(0), fail: true });
        let router = DicomRouter::new(mock);

        assert!(router.route(&saved(&dir, "a.dcm").await, true).await.is_none());
    }
}

//! Moves attachment content out of FHIR resources into local storage

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;
use tracing::debug;

use super::fetch::{is_remote, RemoteFetcher};
use super::storage::{AttachmentScope, AttachmentStorage, SavedAttachment};
use crate::dicom::DicomRouter;
use crate::types::{DataFlowError, Result};

/// Media type assumed when an attachment declares none
const FALLBACK_MEDIA: &str = "text/plain";

pub struct AttachmentExtractor {
    storage: AttachmentStorage,
    fetcher: Arc<dyn RemoteFetcher>,
    dicom: Option<DicomRouter>,
}

impl AttachmentExtractor {
    pub fn new(storage: AttachmentStorage, fetcher: Arc<dyn RemoteFetcher>) -> Self {
        Self {
            storage,
            fetcher,
            dicom: None,
        }
    }

    /// Enable DICOM routing. Without a router DICOM files stay local.
    pub fn with_dicom(mut self, router: DicomRouter) -> Self {
        self.dicom = Some(router);
        self
    }

    pub fn storage(&self) -> &AttachmentStorage {
        &self.storage
    }

    /// Extract one Attachment element (or a Binary resource) in place.
    ///
    /// Inline `data` is decoded and removed; a remote `url` is downloaded.
    /// Either way `url` is rewritten to the stored file, or to the DICOM
    /// study when routed. Elements with neither are left untouched.
    pub async fn extract(
        &self,
        attachment: &mut Value,
        scope: &AttachmentScope,
        radiology: bool,
    ) -> Result<Option<SavedAttachment>> {
        let media = attachment
            .get("contentType")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(FALLBACK_MEDIA)
            .to_string();

        let saved = if let Some(data) = attachment.get("data").and_then(Value::as_str) {
            let bytes = STANDARD
                .decode(data.trim())
                .map_err(|e| DataFlowError::Attachment(format!("Invalid base64 data: {e}")))?;
            self.storage.write(scope, &media, &bytes).await?
        } else if let Some(url) = attachment
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| is_remote(u))
        {
            let url = url.to_string();
            self.download(&url, scope, &media).await?
        } else {
            return Ok(None);
        };

        let mut reference = saved.reference();
        if let Some(router) = &self.dicom {
            if let Some(study) = router.route(&saved, radiology).await {
                reference = study;
            }
        }

        if let Some(object) = attachment.as_object_mut() {
            object.remove("data");
            object.insert("url".to_string(), Value::String(reference));
        }
        Ok(Some(saved))
    }

    async fn download(
        &self,
        url: &str,
        scope: &AttachmentScope,
        media: &str,
    ) -> Result<SavedAttachment> {
        let (file_name, path) = self.storage.allocate(scope, media).await?;

        match self.fetcher.download(url, &path).await {
            Ok(size_bytes) => {
                debug!(url = %url, file = %file_name, size_bytes, "Fetched linked attachment");
                Ok(SavedAttachment {
                    file_name,
                    path,
                    media: media.to_string(),
                    size_bytes,
                })
            }
            Err(e) => {
                self.storage.discard(&path).await;
                if e.is_transient() {
                    Err(e)
                } else {
                    Err(DataFlowError::Attachment(format!("Failed to download {url}: {e}")))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dicom::client::{DicomClient, InstanceDescriptor, MainDicomTags, StudyDescriptor};
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    struct StaticFetcher(&'static [u8]);

    #[async_trait::async_trait]
    impl RemoteFetcher for StaticFetcher {
        async fn fetch_text(&self, _url: &str) -> Result<String> {
            Ok(String::from_utf8_lossy(self.0).into_owned())
        }

        async fn download(&self, _url: &str, dest: &Path) -> Result<u64> {
            tokio::fs::write(dest, self.0).await?;
            Ok(self.0.len() as u64)
        }
    }

    struct FailingFetcher;

    #[async_trait::async_trait]
    impl RemoteFetcher for FailingFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String> {
            Err(DataFlowError::Http(format!("unreachable {url}")))
        }

        async fn download(&self, url: &str, _dest: &Path) -> Result<u64> {
            Err(DataFlowError::Http(format!("unreachable {url}")))
        }
    }

    struct StudyServer;

    #[async_trait::async_trait]
    impl DicomClient for StudyServer {
        async fn upload_instance(&self, _bytes: Vec<u8>) -> Result<InstanceDescriptor> {
            Ok(InstanceDescriptor {
                id: "i".into(),
                parent_study: "s".into(),
                status: None,
            })
        }

        async fn study(&self, _study_id: &str) -> Result<StudyDescriptor> {
            Ok(StudyDescriptor {
                id: "s".into(),
                main_dicom_tags: MainDicomTags {
                    study_instance_uid: "1.2.3".into(),
                },
            })
        }
    }

    fn extractor(root: &Path, fetcher: Arc<dyn RemoteFetcher>) -> AttachmentExtractor {
        AttachmentExtractor::new(AttachmentStorage::new(root), fetcher)
    }

    #[tokio::test]
    async fn test_inline_pdf_roundtrip() {
        let temp = TempDir::new().unwrap();
        let extractor = extractor(temp.path(), Arc::new(StaticFetcher(b"")));
        let scope = extractor.storage().scope("consent-1", "txn-1");
        let pdf = b"%PDF-1.7 minimal";
        let mut attachment = json!({"contentType": "application/pdf", "data": STANDARD.encode(pdf)});

        let saved = extractor.extract(&mut attachment, &scope, false).await.unwrap().unwrap();

        assert!(saved.file_name.ends_with(".pdf"));
        assert_eq!(tokio::fs::read(&saved.path).await.unwrap(), pdf);
        assert!(attachment.get("data").is_none());
        assert_eq!(attachment["url"], format!("/attachments/{}", saved.file_name));
    }

    #[tokio::test]
    async fn test_linked_attachment_is_downloaded() {
        let temp = TempDir::new().unwrap();
        let extractor = extractor(temp.path(), Arc::new(StaticFetcher(b"\x89PNG")));
        let scope = extractor.storage().scope("c", "t");
        let mut attachment = json!({"contentType": "image/png", "url": "https://hip.example/scan.png"});

        let saved = extractor.extract(&mut attachment, &scope, false).await.unwrap().unwrap();
        assert_eq!(saved.size_bytes, 4);
        assert_eq!(attachment["url"], saved.reference());
    }

    #[tokio::test]
    async fn test_local_and_empty_attachments_untouched() {
        let temp = TempDir::new().unwrap();
        let extractor = extractor(temp.path(), Arc::new(FailingFetcher));
        let scope = extractor.storage().scope("c", "t");

        let mut local = json!({"contentType": "application/pdf", "url": "/attachments/x.pdf"});
        assert!(extractor.extract(&mut local, &scope, false).await.unwrap().is_none());
        assert_eq!(local["url"], "/attachments/x.pdf");

        let mut empty = json!({"title": "nothing here"});
        assert!(extractor.extract(&mut empty, &scope, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failures_surface_as_attachment_errors() {
        let temp = TempDir::new().unwrap();
        let extractor = extractor(temp.path(), Arc::new(FailingFetcher));
        let scope = extractor.storage().scope("c", "t");

        let mut bad_data = json!({"contentType": "application/pdf", "data": "***"});
        assert!(matches!(
            extractor.extract(&mut bad_data, &scope, false).await,
            Err(DataFlowError::Attachment(_))
        ));

        let mut unreachable = json!({"contentType": "application/pdf", "url": "https://hip.example/a.pdf"});
        let err = extractor.extract(&mut unreachable, &scope, false).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(unreachable["url"], "https://hip.example/a.pdf");

        let mut listing = tokio::fs::read_dir(scope.dir()).await.unwrap();
        assert!(listing.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejected_download_is_permanent() {
        struct Gone;

        #[async_trait::async_trait]
        impl RemoteFetcher for Gone {
            async fn fetch_text(&self, url: &str) -> Result<String> {
                Err(DataFlowError::Rejected(format!("HTTP 404 fetching {url}")))
            }

            async fn download(&self, url: &str, _dest: &Path) -> Result<u64> {
                Err(DataFlowError::Rejected(format!("HTTP 404 fetching {url}")))
            }
        }

        let temp = TempDir::new().unwrap();
        let extractor = extractor(temp.path(), Arc::new(Gone));
        let scope = extractor.storage().scope("c", "t");

        let mut missing = json!({"contentType": "application/pdf", "url": "https://hip.example/gone.pdf"});
        assert!(matches!(
            extractor.extract(&mut missing, &scope, false).await,
            Err(DataFlowError::Attachment(_))
        ));
    }

    #[tokio::test]
    async fn test_radiology_dicom_gets_study_reference() {
        let temp = TempDir::new().unwrap();
        let extractor = extractor(temp.path(), Arc::new(StaticFetcher(b"")))
            .with_dicom(DicomRouter::new(Arc::new(StudyServer)));
        let scope = extractor.storage().scope("c", "t");

        let mut dicom = json!({"contentType": "application/dicom", "data": STANDARD.encode(b"DICM")});
        extractor.extract(&mut dicom, &scope, true).await.unwrap();
        assert_eq!(dicom["url"], "/dicom-server/studies/1.2.3");

        let mut png = json!({"contentType": "image/png", "data": STANDARD.encode(b"PNG")});
        let saved = extractor.extract(&mut png, &scope, true).await.unwrap().unwrap();
        assert_eq!(png["url"], saved.reference());
    }
}

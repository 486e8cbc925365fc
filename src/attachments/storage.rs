//! Transaction-scoped attachment storage
//!
//! Layout: `{root}/{encoded consent request id}/{encoded transaction id}/{uuid}{ext}`.
//! Files are exposed to clients as `/attachments/{file name}`.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::Result;

/// Public path prefix of stored attachments
pub const ATTACHMENT_PREFIX: &str = "/attachments/";

/// Extension of the DICOM media type
pub const DICOM_EXTENSION: &str = ".dcm";

/// Media type to file extension; anything else is stored as `.txt`
const EXTENSIONS: [(&str, &str); 8] = [
    ("application/pdf", ".pdf"),
    ("application/dicom", DICOM_EXTENSION),
    ("application/msword", ".doc"),
    ("text/rtf", ".rtf"),
    ("image/jpeg", ".jpeg"),
    ("image/png", ".png"),
    ("audio/wav", ".wav"),
    ("video/mpeg", ".mpeg"),
];

const DEFAULT_EXTENSION: &str = ".txt";

/// File extension for a media type, ignoring parameters and case
pub fn extension_for(media: &str) -> &'static str {
    let essence = media.split(';').next().unwrap_or("").trim();
    EXTENSIONS
        .iter()
        .find(|(m, _)| m.eq_ignore_ascii_case(essence))
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Directory that holds one transaction's attachments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentScope {
    dir: PathBuf,
}

impl AttachmentScope {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// An attachment written to local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedAttachment {
    pub file_name: String,
    pub path: PathBuf,
    pub media: String,
    pub size_bytes: u64,
}

impl SavedAttachment {
    /// Reference written back into the resource
    pub fn reference(&self) -> String {
        format!("{ATTACHMENT_PREFIX}{}", self.file_name)
    }

    pub fn is_dicom(&self) -> bool {
        self.file_name.ends_with(DICOM_EXTENSION)
    }
}

/// Writes attachment bytes below a storage root
#[derive(Debug, Clone)]
pub struct AttachmentStorage {
    root: PathBuf,
}

impl AttachmentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scope for one transaction. Ids are percent-encoded so they are safe
    /// as single path segments.
    pub fn scope(&self, consent_request_id: &str, transaction_id: &str) -> AttachmentScope {
        AttachmentScope {
            dir: self
                .root
                .join(urlencoding::encode(consent_request_id).as_ref())
                .join(urlencoding::encode(transaction_id).as_ref()),
        }
    }

    /// Reserve a fresh, unique file path for `media` in `scope`
    pub async fn allocate(&self, scope: &AttachmentScope, media: &str) -> Result<(String, PathBuf)> {
        fs::create_dir_all(scope.dir()).await?;
        let file_name = format!("{}{}", Uuid::new_v4(), extension_for(media));
        let path = scope.dir().join(&file_name);
        Ok((file_name, path))
    }

    /// Write a complete attachment
    pub async fn write(
        &self,
        scope: &AttachmentScope,
        media: &str,
        bytes: &[u8],
    ) -> Result<SavedAttachment> {
        self.write_from(scope, media, bytes).await
    }

    /// Copy an attachment from `reader`. A failed copy leaves no file behind.
    pub async fn write_from<R>(
        &self,
        scope: &AttachmentScope,
        media: &str,
        mut reader: R,
    ) -> Result<SavedAttachment>
    where
        R: AsyncRead + Unpin,
    {
        let (file_name, path) = self.allocate(scope, media).await?;

        let size_bytes = match copy_into(&path, &mut reader).await {
            Ok(size) => size,
            Err(e) => {
                self.discard(&path).await;
                return Err(e);
            }
        };

        info!(file = %file_name, size = size_bytes, "Stored attachment");

        Ok(SavedAttachment {
            file_name,
            path,
            media: media.to_string(),
            size_bytes,
        })
    }

    /// Remove a partially written file, ignoring errors
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            debug!(path = %path.display(), error = %e, "Failed to remove partial attachment");
        }
    }

    /// Remove everything stored for a scope, ignoring errors
    pub async fn clear(&self, scope: &AttachmentScope) {
        if let Err(e) = fs::remove_dir_all(scope.dir()).await {
            debug!(dir = %scope.dir().display(), error = %e, "Failed to clear attachment scope");
        }
    }
}

async fn copy_into<R>(path: &Path, reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut file = fs::File::create(path).await?;
    let size = tokio::io::copy(reader, &mut file).await?;
    file.flush().await?;
    Ok(size)
}

use futures::{Stream, StreamExt};
use shared::MediaKind;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::UploadConfig;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Unsupported file type")]
    UnsupportedExtension { allowed: Vec<String> },
    #[error("File too large")]
    FileTooLarge { limit: usize },
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Upload stream error: {0}")]
    Stream(String),
}

/// An upload persisted to the scratch directory.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub original_name: String,
    pub size: u64,
    pub kind: MediaKind,
}

/// Scratch storage for uploads awaiting analysis.
#[derive(Clone)]
pub struct UploadStore {
    root: PathBuf,
    max_bytes: usize,
    keep_uploads: bool,
    image_extensions: Vec<String>,
    video_extensions: Vec<String>,
}

impl UploadStore {
    pub fn new(config: &UploadConfig) -> Self {
        let normalize = |exts: &[String]| -> Vec<String> {
            exts.iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect()
        };
        Self {
            root: config.dir.clone(),
            max_bytes: config.max_bytes,
            keep_uploads: config.keep_uploads,
            image_extensions: normalize(&config.image_extensions),
            video_extensions: normalize(&config.video_extensions),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_dirs(&self) -> Result<(), UploadError> {
        for kind in [MediaKind::Image, MediaKind::Video] {
            std::fs::create_dir_all(self.root.join(kind.as_ref()))?;
        }
        Ok(())
    }

    /// Checks that a file can actually be created under the scratch root.
    pub fn is_writable(&self) -> bool {
        let probe = self.root.join(format!(".write-probe-{}", Uuid::new_v4()));
        match std::fs::File::create(&probe) {
            Ok(_) => {
                let _ = std::fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    }

    pub fn allowed_extensions(&self, kind: MediaKind) -> &[String] {
        match kind {
            MediaKind::Image => &self.image_extensions,
            MediaKind::Video => &self.video_extensions,
        }
    }

    pub fn extension_of(filename: &str) -> Option<String> {
        filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
    }

    pub fn is_allowed(&self, filename: &str, kind: MediaKind) -> bool {
        Self::extension_of(filename)
            .map(|ext| self.allowed_extensions(kind).contains(&ext))
            .unwrap_or(false)
    }

    /// Image extensions are checked before video ones.
    pub fn classify(&self, filename: &str) -> Option<MediaKind> {
        [MediaKind::Image, MediaKind::Video]
            .into_iter()
            .find(|kind| self.is_allowed(filename, *kind))
    }

    pub fn validate(&self, filename: &str, kind: MediaKind) -> Result<(), UploadError> {
        if self.is_allowed(filename, kind) {
            Ok(())
        } else {
            Err(UploadError::UnsupportedExtension {
                allowed: self.allowed_extensions(kind).to_vec(),
            })
        }
    }

    /// Reduces a client-supplied name to a safe single path component.
    pub fn sanitize_filename(filename: &str) -> String {
        let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
        let cleaned: String = base
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let cleaned = cleaned.trim_start_matches('.');
        if cleaned.is_empty() {
            "upload".to_string()
        } else {
            cleaned.to_string()
        }
    }

    pub fn unique_path(&self, kind: MediaKind, filename: &str) -> PathBuf {
        self.root.join(kind.as_ref()).join(format!(
            "{}_{}",
            Uuid::new_v4(),
            Self::sanitize_filename(filename)
        ))
    }

    /// Streams `chunks` to a fresh scratch file, enforcing the size limit.
    ///
    /// Partially written files are removed when the upload is rejected.
    pub async fn store<S, B, E>(
        &self,
        kind: MediaKind,
        filename: &str,
        chunks: S,
    ) -> Result<StoredUpload, UploadError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        self.validate(filename, kind)?;

        let path = self.unique_path(kind, filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match self.write_chunks(&path, chunks).await {
            Ok(size) => {
                log::info!("Saved upload {} ({} bytes)", path.display(), size);
                Ok(StoredUpload {
                    path,
                    original_name: filename.to_string(),
                    size,
                    kind,
                })
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    log::debug!(
                        "Could not remove rejected upload {}: {}",
                        path.display(),
                        remove_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn write_chunks<S, B, E>(&self, path: &Path, mut chunks: S) -> Result<u64, UploadError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let mut file = tokio::fs::File::create(path).await?;
        let mut written: usize = 0;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| UploadError::Stream(e.to_string()))?;
            let bytes = chunk.as_ref();
            written += bytes.len();
            if written > self.max_bytes {
                return Err(UploadError::FileTooLarge {
                    limit: self.max_bytes,
                });
            }
            file.write_all(bytes).await?;
        }

        file.flush().await?;
        Ok(written as u64)
    }

    /// Removes a scratch file once its analysis is done.
    pub async fn discard(&self, upload: &StoredUpload) {
        if self.keep_uploads {
            return;
        }
        if let Err(e) = tokio::fs::remove_file(&upload.path).await {
            log::warn!(
                "Failed to remove scratch file {}: {}",
                upload.path.display(),
                e
            );
        }
    }
}

//! The `files` module gives jobs read access to uploaded datasets.
//!
//! Uploads are owned by another service; the messaging core only checks that
//! a file exists and reads a bounded prefix of it for prompts.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use crate::config::FileSettings;
use crate::utils::error::FileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn stat(&self, file_id: &str) -> Result<FileInfo, FileError>;

    /// Read at most `max_bytes` from the start of the file.
    async fn read_bytes(&self, file_id: &str, max_bytes: usize) -> Result<Vec<u8>, FileError>;
}

/// Uploaded files stored flat in one directory, addressed by file name.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_settings(settings: &FileSettings) -> Self {
        Self::new(&settings.upload_dir)
    }

    /// Resolve an id inside the upload directory. Ids that could escape it
    /// are rejected.
    fn path_of(&self, file_id: &str) -> Result<PathBuf, FileError> {
        let invalid = file_id.is_empty()
            || file_id == "."
            || file_id.contains("..")
            || file_id.contains(['/', '\\', '\0']);
        if invalid {
            return Err(FileError::InvalidId(file_id.to_string()));
        }
        Ok(self.root.join(file_id))
    }
}

fn not_found(file_id: &str, err: std::io::Error) -> FileError {
    if err.kind() == ErrorKind::NotFound {
        FileError::NotFound(file_id.to_string())
    } else {
        FileError::Io(err)
    }
}

#[async_trait]
impl FileStore for UploadDir {
    async fn stat(&self, file_id: &str) -> Result<FileInfo, FileError> {
        let path = self.path_of(file_id)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found(file_id, e))?;
        if !metadata.is_file() {
            return Err(FileError::NotFound(file_id.to_string()));
        }
        Ok(FileInfo {
            size: metadata.len(),
        })
    }

    async fn read_bytes(&self, file_id: &str, max_bytes: usize) -> Result<Vec<u8>, FileError> {
        let path = self.path_of(file_id)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found(file_id, e))?;

        let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024));
        file.take(max_bytes as u64).read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests;

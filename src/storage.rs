use crate::error::AppError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Durable storage for original and derived image files, addressed by key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
    async fn exists(&self, key: &str) -> bool;
    /// Local filesystem location for a key. The file need not exist.
    fn resolve(&self, key: &str) -> PathBuf;
}

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, AppError> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
            log::debug!("Created upload directory: {:?}", root);
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Keys are flat file names; anything that could escape the root is rejected.
fn validate_key(key: &str) -> Result<(), AppError> {
    if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
        return Err(AppError::InvalidInput(format!("invalid storage key '{}'", key)));
    }
    Ok(())
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<PathBuf, AppError> {
        validate_key(key)?;
        let path = self.root.join(key);
        tokio::fs::write(&path, bytes).await?;
        log::trace!("Stored {} bytes at {:?}", bytes.len(), path);
        Ok(path)
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        validate_key(key)?;
        match tokio::fs::remove_file(self.root.join(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> bool {
        if validate_key(key).is_err() {
            return false;
        }
        tokio::fs::try_exists(self.root.join(key)).await.unwrap_or(false)
    }

    fn resolve(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

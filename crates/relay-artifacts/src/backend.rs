//! Blob storage backends.
//!
//! Backends are content-addressed: blobs are keyed by their SHA-256 digest,
//! so identical outputs from different producers share storage.

use crate::digest::shard_path;
use async_trait::async_trait;
use relay_core::artifact::ContentHash;
use relay_core::ArtifactError;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

type Result<T> = std::result::Result<T, ArtifactError>;

/// Trait for blob storage backends.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Store a blob under its digest. Storing an existing digest is a no-op.
    async fn write(&self, digest: &ContentHash, data: &[u8]) -> Result<()>;

    /// Read a blob, if present.
    async fn read(&self, digest: &ContentHash) -> Result<Option<Vec<u8>>>;

    /// Remove a blob. Removing a missing blob is not an error.
    async fn remove(&self, digest: &ContentHash) -> Result<()>;

    async fn exists(&self, digest: &ContentHash) -> Result<bool>;
}

/// In-memory backend for tests and single-process runs.
#[derive(Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<ContentHash, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn write(&self, digest: &ContentHash, data: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .await
            .entry(digest.clone())
            .or_insert_with(|| data.to_vec());
        Ok(())
    }

    async fn read(&self, digest: &ContentHash) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.read().await.get(digest).cloned())
    }

    async fn remove(&self, digest: &ContentHash) -> Result<()> {
        self.blobs.write().await.remove(digest);
        Ok(())
    }

    async fn exists(&self, digest: &ContentHash) -> Result<bool> {
        Ok(self.blobs.read().await.contains_key(digest))
    }
}

/// Filesystem backend for local runs.
pub struct FsBackend {
    root_dir: PathBuf,
}

impl FsBackend {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn blob_path(&self, digest: &ContentHash) -> PathBuf {
        self.root_dir.join("blobs").join(shard_path(digest))
    }
}

#[async_trait]
impl BlobBackend for FsBackend {
    async fn write(&self, digest: &ContentHash, data: &[u8]) -> Result<()> {
        let path = self.blob_path(digest);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never see a partial blob.
        let tmp = path.with_extension("partial");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read(&self, digest: &ContentHash) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.blob_path(digest)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, digest: &ContentHash) -> Result<()> {
        match tokio::fs::remove_file(self.blob_path(digest)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, digest: &ContentHash) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.blob_path(digest)).await?)
    }
}

//! Resource Store
//!
//! On-disk persistence for in-flight uploads: chunk bytes under `.resources`,
//! descriptors under `.metadata`, and the final move into the upload
//! directory once the last byte arrives.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use crate::error::{Result, TusError};
use super::codec::DescriptorCodec;
use super::paths::UploadPaths;
use super::types::Resource;

/// Resource persistence for one resolved upload directory
#[derive(Clone)]
pub struct ResourceStore {
    paths: UploadPaths,
    codec: Arc<dyn DescriptorCodec>,
}

impl ResourceStore {
    pub fn new(paths: UploadPaths, codec: Arc<dyn DescriptorCodec>) -> Self {
        Self { paths, codec }
    }

    pub fn paths(&self) -> &UploadPaths {
        &self.paths
    }

    /// Allocate a new resource at offset 0. Nothing is written yet.
    pub fn create(&self, file_name: &str, file_size: u64, metadata_header: &str) -> Resource {
        Resource::new(file_name, file_size, metadata_header)
    }

    // ========================================================================
    // Chunks
    // ========================================================================

    /// Write `payload` into the chunk file at the resource's offset.
    ///
    /// The file is created if absent and never truncated.
    pub async fn save_chunk(&self, resource: &Resource, payload: &[u8]) -> Result<u64> {
        let path = self.paths.resource_path(&resource.uid).await?;
        let mut file = open_chunk_file(&path, resource.offset).await?;

        file.write_all(payload)
            .await
            .map_err(|e| TusError::storage(&path, e))?;
        file.sync_data()
            .await
            .map_err(|e| TusError::storage(&path, e))?;

        Ok(payload.len() as u64)
    }

    /// Stream a request body into the chunk file at the resource's offset.
    ///
    /// Stops before writing any piece that would move the offset past the
    /// declared size. Bytes already written stay on disk past the persisted
    /// offset and are overwritten by the retry.
    pub async fn save_chunk_stream<S, E>(&self, resource: &Resource, mut body: S) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let path = self.paths.resource_path(&resource.uid).await?;
        let mut file = open_chunk_file(&path, resource.offset).await?;
        let remaining = resource.remaining();
        let mut written: u64 = 0;

        while let Some(piece) = body.next().await {
            let piece = piece.map_err(|e| TusError::Body(e.to_string()))?;
            let len = piece.len() as u64;

            if written + len > remaining {
                file.flush().await.map_err(|e| TusError::storage(&path, e))?;
                return Err(TusError::ChunkExceedsLength {
                    offset: resource.offset,
                    chunk: written + len,
                    length: resource.file_size,
                });
            }

            file.write_all(&piece)
                .await
                .map_err(|e| TusError::storage(&path, e))?;
            written += len;
        }

        file.sync_data()
            .await
            .map_err(|e| TusError::storage(&path, e))?;

        tracing::debug!(
            resource_uid = %resource.uid,
            offset = resource.offset,
            written = written,
            "Chunk written"
        );

        Ok(written)
    }

    /// Whether the chunk file of `uid` is on disk
    pub async fn chunk_exists(&self, uid: &str) -> Result<bool> {
        let path = self.paths.resource_path(uid).await?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    // ========================================================================
    // Descriptors
    // ========================================================================

    /// Write the resource descriptor, replacing any previous one
    pub async fn save_descriptor(&self, resource: &Resource) -> Result<PathBuf> {
        let path = self.paths.descriptor_path(&resource.uid).await?;
        let data = self.codec.encode(resource)?;

        // Written aside and renamed so a reader never sees a torn descriptor
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, &data)
            .await
            .map_err(|e| TusError::storage(&staging, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| TusError::storage(&path, e))?;

        Ok(path)
    }

    /// Read a resource back from its descriptor.
    ///
    /// A missing, unreadable or undecodable descriptor is `NotFound`.
    pub async fn load_descriptor(&self, uid: &str) -> Result<Resource> {
        if Uuid::parse_str(uid).is_err() {
            return Err(TusError::NotFound(uid.to_string()));
        }

        let path = self.paths.descriptor_path(uid).await?;
        let data = tokio::fs::read(&path).await.map_err(|e| {
            tracing::debug!(resource_uid = %uid, error = %e, "Descriptor unreadable");
            TusError::NotFound(uid.to_string())
        })?;

        let resource = self.codec.decode(&data).map_err(|e| {
            tracing::warn!(resource_uid = %uid, error = %e, "Descriptor undecodable");
            TusError::NotFound(uid.to_string())
        })?;

        if resource.uid != uid {
            tracing::warn!(resource_uid = %uid, stored_uid = %resource.uid, "Descriptor id mismatch");
            return Err(TusError::NotFound(uid.to_string()));
        }

        Ok(resource)
    }

    // ========================================================================
    // Terminal Transitions
    // ========================================================================

    /// Move the chunk file to its final name and drop the descriptor
    pub async fn complete(&self, resource: &Resource) -> Result<PathBuf> {
        let source = self.paths.resource_path(&resource.uid).await?;
        let target = self.paths.file_path(&resource.file_name);

        if let Err(e) = tokio::fs::rename(&source, &target).await {
            if e.kind() != std::io::ErrorKind::CrossesDevices {
                return Err(TusError::storage(&target, e));
            }

            tracing::debug!(
                resource_uid = %resource.uid,
                error = %e,
                "Rename failed, copying instead"
            );
            tokio::fs::copy(&source, &target)
                .await
                .map_err(|e| TusError::storage(&target, e))?;
            tokio::fs::remove_file(&source)
                .await
                .map_err(|e| TusError::storage(&source, e))?;
        }

        self.delete_descriptor(&resource.uid).await?;

        tracing::info!(
            resource_uid = %resource.uid,
            file_name = %resource.file_name,
            file_size = resource.file_size,
            path = %target.display(),
            "Upload completed"
        );

        Ok(target)
    }

    /// Remove chunk file and descriptor. Returns whether anything was removed.
    pub async fn delete(&self, resource: &Resource) -> Result<bool> {
        let chunk = remove_if_exists(self.paths.resource_path(&resource.uid).await?).await?;
        let descriptor = self.delete_descriptor(&resource.uid).await?;
        Ok(chunk || descriptor)
    }

    async fn delete_descriptor(&self, uid: &str) -> Result<bool> {
        remove_if_exists(self.paths.descriptor_path(uid).await?).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn open_chunk_file(path: &Path, offset: u64) -> Result<tokio::fs::File> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| TusError::storage(path, e))?;

    file.seek(SeekFrom::Start(offset))
        .await
        .map_err(|e| TusError::storage(path, e))?;

    Ok(file)
}

async fn remove_if_exists(path: PathBuf) -> Result<bool> {
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(TusError::storage(&path, e)),
    }
}

// ============================================================================
// Tests
// ============================================================================

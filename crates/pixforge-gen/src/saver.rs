//! Persisting generated images

use async_trait::async_trait;
use pixforge_core::{PixforgeError, Result};
use std::path::Path;

/// Writes image bytes to a path
#[async_trait]
pub trait ImageSaver: Send + Sync {
    async fn save(&self, bytes: &[u8], path: &Path) -> Result<()>;
}

/// Saves to the local filesystem, creating parent directories as needed
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSaver;

#[async_trait]
impl ImageSaver for FsSaver {
    async fn save(&self, bytes: &[u8], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PixforgeError::PersistFailed(format!("{}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| PixforgeError::PersistFailed(format!("{}: {}", path.display(), e)))
    }
}

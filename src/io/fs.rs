use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use super::{network_failure, TileLoader};
use crate::error::TileError;

/// Reads tiles from a local directory, e.g. an unpacked `.dzi` pyramid.
#[derive(Debug, Clone)]
pub struct FsTileLoader {
    root: PathBuf,
    identifier: String,
}

impl FsTileLoader {
    /// Resolve addresses relative to `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let identifier = format!("fs:{}", root.display());
        Self { root, identifier }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, address: &str) -> PathBuf {
        let trimmed = address.strip_prefix("file://").unwrap_or(address);
        self.root.join(trimmed)
    }
}

#[async_trait]
impl TileLoader for FsTileLoader {
    async fn load(&self, address: &str, _post_data: Option<&str>) -> Result<Bytes, TileError> {
        let path = self.resolve(address);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| network_failure(address, format!("{}: {}", path.display(), e)))?;
        Ok(Bytes::from(data))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

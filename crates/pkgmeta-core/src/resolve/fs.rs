//! File system and install-layout seams used by the local descriptor tier.

use crate::config::ResolverDefaults;
use crate::error::{MetadataError, Result};
use crate::model::PackageIdentity;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Read-only file access.
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// File contents, or `None` if the file does not exist.
    async fn read_to_string(&self, path: &Path) -> Result<Option<String>>;

    /// Entries of a directory; empty if the directory does not exist.
    async fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;
}

/// `tokio::fs` backed file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_to_string(&self, path: &Path) -> Result<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MetadataError::io_with_path(e, path)),
        }
    }

    async fn list_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MetadataError::io_with_path(e, path)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MetadataError::io_with_path(e, path))?
        {
            paths.push(entry.path());
        }
        paths.sort();
        Ok(paths)
    }
}

/// Maps a package identity to the directory it is installed in.
pub trait InstallPathResolver: Send + Sync {
    fn install_path(&self, identity: &PackageIdentity) -> Option<PathBuf>;
}

/// Global packages folder layout: `{root}/{name}/{version}`, lowercased.
#[derive(Debug, Clone)]
pub struct GlobalPackagesLayout {
    root: PathBuf,
}

impl GlobalPackagesLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at the user's default packages folder, if there is one.
    pub fn user_default() -> Option<Self> {
        ResolverDefaults::packages_root().map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl InstallPathResolver for GlobalPackagesLayout {
    fn install_path(&self, identity: &PackageIdentity) -> Option<PathBuf> {
        Some(
            self.root
                .join(identity.name().to_lowercase())
                .join(identity.version().to_lowercase()),
        )
    }
}

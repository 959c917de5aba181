use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use anyhow::{Context, bail};
use async_trait::async_trait;
use uuid::Uuid;

/// File operations the registry and the pool need from wherever scene files
/// live: the local project tree or a sandbox's remote filesystem.
///
/// Paths are relative to the filesystem's own root.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Replaces the file at `path`. Readers never observe a partial write.
    async fn write(&self, path: &Path, content: &[u8]) -> anyhow::Result<()>;
    async fn read(&self, path: &Path) -> anyhow::Result<Vec<u8>>;
    /// File names (not paths) of the regular files directly inside `dir`.
    async fn list(&self, dir: &Path) -> anyhow::Result<Vec<String>>;
    /// Removes a file. Removing a missing file is not an error.
    async fn remove(&self, path: &Path) -> anyhow::Result<()>;
}

/// True when the failure is a missing file rather than an unreadable one.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<std::io::Error>()
            .is_some_and(|io| io.kind() == ErrorKind::NotFound)
    })
}

/// A [`FileSystem`] rooted at a directory on local disk.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &Path) -> anyhow::Result<PathBuf> {
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) | Component::ParentDir => {
                    bail!("path escapes filesystem root: {}", path.display())
                }
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl FileSystem for LocalFs {
    async fn write(&self, path: &Path, content: &[u8]) -> anyhow::Result<()> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .context("write target has no parent directory")?;
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let file_name = target
            .file_name()
            .and_then(|name| name.to_str())
            .context("write target has no file name")?;
        let staging = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().as_simple()));
        tokio::fs::write(&staging, content)
            .await
            .with_context(|| format!("failed to write {}", staging.display()))?;
        if let Err(err) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(err).with_context(|| format!("failed to replace {}", target.display()));
        }
        Ok(())
    }

    async fn read(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .with_context(|| format!("failed to read {}", target.display()))
    }

    async fn list(&self, dir: &Path) -> anyhow::Result<Vec<String>> {
        let target = self.resolve(dir)?;
        let mut entries = match tokio::fs::read_dir(&target).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to list {}", target.display()));
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn remove(&self, path: &Path) -> anyhow::Result<()> {
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", target.display())),
        }
    }
}

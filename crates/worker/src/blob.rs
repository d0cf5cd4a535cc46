use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

/// Blob storage as the handlers see it. The core never touches this; only
/// the handler catalog does.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(&self, data: &[u8], path: &str, content_type: &str) -> anyhow::Result<()>;
    async fn exists(&self, path: &str) -> anyhow::Result<bool>;
}

/// Filesystem-backed blob store rooted at a single directory. Good enough
/// for single-node deployments and tests; swap in an object-store client
/// behind the same trait for anything else.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let rel = Path::new(path);
        let escapes = rel.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes || path.is_empty() {
            anyhow::bail!("invalid blob path: {path:?}");
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, data: &[u8], path: &str, _content_type: &str) -> anyhow::Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> anyhow::Result<bool> {
        let target = self.resolve(path)?;
        Ok(tokio::fs::try_exists(&target).await?)
    }
}

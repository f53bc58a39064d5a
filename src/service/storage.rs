use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// 原始文件存储
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, path: &str) -> Result<Vec<u8>>;
    async fn delete(&self, path: &str) -> Result<()>;
}

/// 本地目录实现, 对象路径是相对 `root` 的路径
#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 拒绝绝对路径和 `..`
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(PipelineError::InvalidInput(format!("invalid storage path '{}'", path)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        tracing::debug!("stored {} bytes at {}", bytes.len(), full.display());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        Ok(tokio::fs::read(&full).await?)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path());

        storage.put("org-1/quote.pdf", b"%PDF-1.4").await.unwrap();
        assert_eq!(storage.get("org-1/quote.pdf").await.unwrap(), b"%PDF-1.4");

        storage.delete("org-1/quote.pdf").await.unwrap();
        assert!(matches!(storage.get("org-1/quote.pdf").await, Err(PipelineError::Storage(_))));
        // 重复删除不报错
        storage.delete("org-1/quote.pdf").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_paths_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalObjectStorage::new(dir.path());

        for path in ["../escape.pdf", "/etc/passwd", ""] {
            let err = storage.put(path, b"x").await.unwrap_err();
            assert!(matches!(err, PipelineError::InvalidInput(_)), "{}", path);
        }
    }
}

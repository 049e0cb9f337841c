use crate::{BlobError, BlobResult, BlobStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Filesystem-backed blob store rooted at a directory.
///
/// Keys map to paths under the root; traversal segments are rejected so a
/// hostile key cannot escape it. Writes go through a temp file plus rename
/// so readers never observe a partial object.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> BlobResult<PathBuf> {
        if key.is_empty() {
            return Err(BlobError::InvalidKey("empty key".to_string()));
        }

        let relative = Path::new(key);
        for component in relative.components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(BlobError::InvalidKey(format!(
                        "key contains non-normal path component: {}",
                        key
                    )))
                }
            }
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> BlobResult<()> {
        let path = self.resolve(key)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp-write");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;

        debug!(key = %key, bytes = bytes.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        let path = self.resolve(key)?;

        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobError::NotFound(key.to_string()))
            }
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let path = self.resolve(key)?;

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::Io(e)),
        }
    }

    async fn ping(&self) -> BlobResult<()> {
        fs::create_dir_all(&self.root).await?;
        fs::metadata(&self.root).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (_dir, store) = store();

        store
            .put("submissions/u1/p1/1-abc.py", b"print(42)")
            .await
            .unwrap();
        let bytes = store.get("submissions/u1/p1/1-abc.py").await.unwrap();

        assert_eq!(bytes, b"print(42)");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_dir, store) = store();

        let err = store.get("submissions/u1/p1/missing.py").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (_dir, store) = store();

        store.put("a/b.txt", b"x").await.unwrap();
        store.delete("a/b.txt").await.unwrap();
        // Second delete of the same key must not error
        store.delete("a/b.txt").await.unwrap();

        assert!(store.get("a/b.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let (_dir, store) = store();

        store.put("k", b"first").await.unwrap();
        store.put("k", b"second").await.unwrap();

        assert_eq!(store.get("k").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_traversal_key_rejected() {
        let (_dir, store) = store();

        let err = store.put("../outside", b"x").await.unwrap_err();
        assert!(matches!(err, BlobError::InvalidKey(_)));

        let err = store.get("/etc/passwd").await.unwrap_err();
        assert!(matches!(err, BlobError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_ping() {
        let (_dir, store) = store();
        store.ping().await.unwrap();
    }
}

//! Filesystem-backed object storage for development and single-node deployments

use super::{ObjectMetadata, ObjectStorage};
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

const SIDECAR_SUFFIX: &str = ".metadata.json";

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    metadata: ObjectMetadata,
}

/// Stores objects as files below a root directory.
///
/// Each object gets a `<file>.metadata.json` sidecar holding its content type
/// and user metadata.
pub struct LocalStorage {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl LocalStorage {
    /// Create the store, creating `root` if needed.
    ///
    /// Without `public_base_url`, returned URLs are `file://` URLs.
    pub fn new(root: impl AsRef<Path>, public_base_url: Option<String>) -> Result<Self, StorageError> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self {
            root,
            public_base_url: public_base_url.map(|base| base.trim_end_matches('/').to_string()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn public_url(&self, key: &str, path: &Path) -> Result<String, StorageError> {
        match &self.public_base_url {
            Some(base) => Ok(format!("{base}/{key}")),
            None => Url::from_file_path(path)
                .map(|url| url.to_string())
                .map_err(|_| StorageError::InvalidKey(key.to_string())),
        }
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(SIDECAR_SUFFIX);
    PathBuf::from(name)
}

fn not_found(key: &str, err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            metadata: metadata.clone(),
        };
        let sidecar = serde_json::to_vec_pretty(&sidecar)
            .map_err(|e| StorageError::Io(std::io::Error::new(ErrorKind::InvalidData, e)))?;

        tokio::fs::write(&path, &bytes).await?;
        tokio::fs::write(sidecar_path(&path), sidecar).await?;

        self.public_url(key, &path)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(key)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| not_found(key, e))?;
        Ok(Bytes::from(bytes))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| not_found(key, e))?;
        match tokio::fs::remove_file(sidecar_path(&path)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(StorageError::Io(e)),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_through_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).unwrap();

        let mut metadata = ObjectMetadata::new();
        metadata.insert("prediction_id".to_string(), "abc".to_string());
        let url = storage
            .put("uploads/a.png", Bytes::from_static(b"\x89PNG-bytes"), "image/jpeg", &metadata)
            .await
            .unwrap();

        let path = Url::parse(&url).unwrap().to_file_path().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"\x89PNG-bytes");
        assert_eq!(storage.get("uploads/a.png").await.unwrap(), Bytes::from_static(b"\x89PNG-bytes"));

        let sidecar: Sidecar = serde_json::from_slice(
            &std::fs::read(storage.root().join("uploads/a.png.metadata.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(sidecar.content_type, "image/jpeg");
        assert_eq!(sidecar.metadata["prediction_id"], "abc");
    }

    #[tokio::test]
    async fn test_public_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let storage =
            LocalStorage::new(dir.path(), Some("http://localhost:5000/archive/".into())).unwrap();

        let url = storage
            .put("uploads/b.jpg", Bytes::from_static(b"jpeg"), "image/jpeg", &ObjectMetadata::new())
            .await
            .unwrap();
        assert_eq!(url, "http://localhost:5000/archive/uploads/b.jpg");
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).unwrap();

        storage
            .put("uploads/c.jpg", Bytes::from_static(b"x"), "image/jpeg", &ObjectMetadata::new())
            .await
            .unwrap();
        storage.delete("uploads/c.jpg").await.unwrap();

        assert!(matches!(
            storage.get("uploads/c.jpg").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!storage.root().join("uploads/c.jpg.metadata.json").exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), None).unwrap();

        for key in ["../evil.jpg", "/etc/passwd", ""] {
            let result = storage
                .put(key, Bytes::from_static(b"x"), "image/jpeg", &ObjectMetadata::new())
                .await;
            assert!(matches!(result, Err(StorageError::InvalidKey(_))), "{key}");
        }
    }
}

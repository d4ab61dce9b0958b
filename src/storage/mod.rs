//! Object storage for archived uploads

pub mod archive;
pub mod gcs;
pub mod local;

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;

pub use archive::{ArchiveStore, ArchivedImage};
pub use gcs::{GcsClient, GcsStorage};
pub use local::LocalStorage;

/// User metadata attached to a stored object
pub type ObjectMetadata = BTreeMap<String, String>;

/// Minimal object store contract needed by the pipeline.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `bytes` under `key` and return a publicly resolvable URL
    async fn put(
        &self,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String, StorageError>;

    /// Fetch the bytes stored under `key`
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Remove the object stored under `key`
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

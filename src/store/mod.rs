mod azure;
mod local;

pub use azure::{AzureBlobStore, CONNECTION_STRING_SECRET};
pub use local::{LocalStore, WriteHandle};

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object_client::ClientError;

#[derive(Debug, Error)]
pub enum DataStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Object already exists: {0}")]
    AlreadyExists(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Store {0} has no client configured (missing connection credential)")]
    NotConfigured(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<ClientError> for DataStoreError {
    fn from(e: ClientError) -> Self {
        match e {
            ClientError::NotFound(what) => DataStoreError::NotFound(what),
            ClientError::AlreadyExists(what) => DataStoreError::AlreadyExists(what),
            ClientError::Transport(msg) => DataStoreError::Transport(msg),
            ClientError::InvalidConnectionString(msg) => DataStoreError::Config(msg),
            other => DataStoreError::Backend(other.to_string()),
        }
    }
}

/// Size and modification time of a stored blob.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileStats {
    pub size: u64,
    /// Seconds since the Unix epoch (UTC).
    pub modified: f64,
}

impl FileStats {
    pub fn new(size: u64, modified: DateTime<Utc>) -> Self {
        let modified =
            modified.timestamp() as f64 + f64::from(modified.timestamp_subsec_nanos()) / 1e9;
        Self { size, modified }
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.modified.floor();
        let nanos = ((self.modified - secs) * 1e9).round() as u32;
        Utc.timestamp_opt(secs as i64, nanos.min(999_999_999)).single()
    }
}

/// Immutable identity of a store instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    /// Logical name of the mount.
    pub name: String,
    /// URL scheme served by the backend (`file`, `az`).
    pub kind: String,
    /// Container name for object stores, empty for the local store.
    pub endpoint: String,
}

impl StoreInfo {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Base URL of the store, e.g. `az://container`.
    pub fn url(&self) -> String {
        if self.endpoint.is_empty() {
            format!("{}://", self.kind)
        } else {
            format!("{}://{}", self.kind, self.endpoint)
        }
    }
}

/// Uniform key-based access to a blob backend.
///
/// Keys are slash-delimited paths starting with `/`. Each backend maps a key
/// onto its own addressing scheme. A `size` of `None` or `Some(0)` in [`get`]
/// reads to the end of the object.
///
/// [`get`]: DataStore::get
#[async_trait]
pub trait DataStore: Send + Sync {
    fn info(&self) -> &StoreInfo;
    async fn get(&self, key: &str, size: Option<u64>, offset: u64)
        -> Result<Bytes, DataStoreError>;
    async fn put(&self, key: &str, data: Bytes, append: bool) -> Result<(), DataStoreError>;
    async fn upload(&self, key: &str, src_path: &Path) -> Result<(), DataStoreError>;
    async fn download(&self, key: &str, target_path: &Path) -> Result<(), DataStoreError>;
    async fn stat(&self, key: &str) -> Result<FileStats, DataStoreError>;
    async fn listdir(&self, key: &str) -> Result<Vec<String>, DataStoreError>;
}

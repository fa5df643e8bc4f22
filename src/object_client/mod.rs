mod azure;
mod memory;

pub use azure::{AzureRestClient, ConnectionString, Credential};
pub use memory::MemoryClient;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Object already exists: {0}")]
    AlreadyExists(String),
    #[error("Request failed ({status}): {message}")]
    Http {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),
}

/// Address of a single blob inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobHandle {
    pub container: String,
    pub name: String,
}

impl std::fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobProperties {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobItem {
    pub name: String,
}

/// Capability the object store delegates transport and authentication to.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    fn object_handle(&self, container: &str, name: &str) -> BlobHandle {
        BlobHandle {
            container: container.to_string(),
            name: name.to_string(),
        }
    }

    /// Store `data` as the blob body. Without `overwrite` an existing blob
    /// is left untouched and the call fails with [`ClientError::AlreadyExists`].
    async fn upload_object(
        &self,
        handle: &BlobHandle,
        data: Bytes,
        overwrite: bool,
    ) -> Result<(), ClientError>;

    /// Read from `offset`, `size` bytes or to the end when `size` is `None`.
    async fn download_range(
        &self,
        handle: &BlobHandle,
        offset: u64,
        size: Option<u64>,
    ) -> Result<Bytes, ClientError>;

    async fn properties(&self, handle: &BlobHandle) -> Result<BlobProperties, ClientError>;

    async fn list_objects(&self, container: &str, prefix: &str)
        -> Result<Vec<BlobItem>, ClientError>;
}

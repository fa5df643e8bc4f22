use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{BlobHandle, BlobItem, BlobProperties, ClientError, ObjectClient};

struct StoredBlob {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

/// In-process object client. Containers must be created before use.
#[derive(Default)]
pub struct MemoryClient {
    containers: RwLock<HashMap<String, BTreeMap<String, StoredBlob>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_container(mut self, container: &str) -> Self {
        self.containers
            .get_mut()
            .entry(container.to_string())
            .or_default();
        self
    }

    pub async fn create_container(&self, container: &str) {
        self.containers
            .write()
            .await
            .entry(container.to_string())
            .or_default();
    }
}

#[async_trait]
impl ObjectClient for MemoryClient {
    async fn upload_object(
        &self,
        handle: &BlobHandle,
        data: Bytes,
        overwrite: bool,
    ) -> Result<(), ClientError> {
        let mut containers = self.containers.write().await;
        let blobs = containers
            .get_mut(&handle.container)
            .ok_or_else(|| ClientError::NotFound(handle.container.clone()))?;

        if !overwrite && blobs.contains_key(&handle.name) {
            return Err(ClientError::AlreadyExists(handle.to_string()));
        }
        blobs.insert(
            handle.name.clone(),
            StoredBlob {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn download_range(
        &self,
        handle: &BlobHandle,
        offset: u64,
        size: Option<u64>,
    ) -> Result<Bytes, ClientError> {
        let containers = self.containers.read().await;
        let blob = containers
            .get(&handle.container)
            .and_then(|blobs| blobs.get(&handle.name))
            .ok_or_else(|| ClientError::NotFound(handle.to_string()))?;

        // A ranged read must start inside the blob; a plain read of an empty
        // blob is fine.
        let len = blob.data.len() as u64;
        let ranged = offset > 0 || size.is_some_and(|n| n > 0);
        if ranged && offset >= len {
            return Err(ClientError::Http {
                status: 416,
                code: Some("InvalidRange".to_string()),
                message: format!("offset {offset} is beyond blob length {len}"),
            });
        }
        let end = match size {
            Some(n) => offset.saturating_add(n).min(len),
            None => len,
        };
        Ok(blob.data.slice(offset as usize..end as usize))
    }

    async fn properties(&self, handle: &BlobHandle) -> Result<BlobProperties, ClientError> {
        let containers = self.containers.read().await;
        let blob = containers
            .get(&handle.container)
            .and_then(|blobs| blobs.get(&handle.name))
            .ok_or_else(|| ClientError::NotFound(handle.to_string()))?;

        Ok(BlobProperties {
            size: blob.data.len() as u64,
            last_modified: blob.last_modified,
        })
    }

    async fn list_objects(
        &self,
        container: &str,
        prefix: &str,
    ) -> Result<Vec<BlobItem>, ClientError> {
        let containers = self.containers.read().await;
        let blobs = containers
            .get(container)
            .ok_or_else(|| ClientError::NotFound(container.to_string()))?;

        Ok(blobs
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| BlobItem { name: name.clone() })
            .collect())
    }
}

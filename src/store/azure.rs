use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::{DataStore, DataStoreError, FileStats, StoreInfo};
use crate::object_client::{AzureRestClient, BlobHandle, ObjectClient};
use crate::secrets::SecretProvider;

/// Secret (or environment variable) holding the storage connection string.
pub const CONNECTION_STRING_SECRET: &str = "AZURE_STORAGE_CONNECTION_STRING";

/// Data store over one Azure Blob Storage container.
///
/// Addressed as `az://<container>`; the account comes from the connection
/// string, never from the URL.
pub struct AzureBlobStore {
    info: StoreInfo,
    client: Option<Arc<dyn ObjectClient>>,
}

impl AzureBlobStore {
    /// Build a store whose client is configured from the
    /// [`CONNECTION_STRING_SECRET`] secret. Without that secret the store is
    /// still created, but every operation fails with `NotConfigured`.
    pub fn new(
        name: &str,
        container: &str,
        secrets: &dyn SecretProvider,
    ) -> Result<Self, DataStoreError> {
        Self::from_secret(name, container, secrets, CONNECTION_STRING_SECRET)
    }

    /// Like [`AzureBlobStore::new`], reading the connection string from `secret_name`.
    pub fn from_secret(
        name: &str,
        container: &str,
        secrets: &dyn SecretProvider,
        secret_name: &str,
    ) -> Result<Self, DataStoreError> {
        let client: Option<Arc<dyn ObjectClient>> = match secrets.secret(secret_name) {
            Some(conn) => Some(Arc::new(AzureRestClient::from_connection_string(&conn)?)),
            None => {
                tracing::warn!(
                    store = name,
                    secret = secret_name,
                    "no connection string found, blob store is unconfigured"
                );
                None
            }
        };

        Ok(Self {
            info: StoreInfo::new("az", name, container),
            client,
        })
    }

    pub fn with_client(name: &str, container: &str, client: Arc<dyn ObjectClient>) -> Self {
        Self {
            info: StoreInfo::new("az", name, container),
            client: Some(client),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    fn client(&self) -> Result<&dyn ObjectClient, DataStoreError> {
        self.client
            .as_deref()
            .ok_or_else(|| DataStoreError::NotConfigured(self.info.url()))
    }

    fn handle(&self, key: &str) -> Result<(&dyn ObjectClient, BlobHandle), DataStoreError> {
        let client = self.client()?;
        let handle = client.object_handle(&self.info.endpoint, normalize_key(key));
        Ok((client, handle))
    }
}

/// Blob name for a key: the leading separator is dropped.
fn normalize_key(key: &str) -> &str {
    key.strip_prefix('/').unwrap_or(key)
}

/// Listing prefix for a directory key, always ending in `/` unless it
/// addresses the whole container.
fn list_prefix(key: &str) -> String {
    let prefix = normalize_key(key);
    if prefix.is_empty() || prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

#[async_trait]
impl DataStore for AzureBlobStore {
    fn info(&self) -> &StoreInfo {
        &self.info
    }

    async fn get(
        &self,
        key: &str,
        size: Option<u64>,
        offset: u64,
    ) -> Result<Bytes, DataStoreError> {
        let (client, handle) = self.handle(key)?;
        let size = size.filter(|n| *n > 0);
        Ok(client.download_range(&handle, offset, size).await?)
    }

    /// Uploads are create-only, so `append` against an existing blob fails
    /// with `AlreadyExists`, as does any second `put` to the same key.
    async fn put(&self, key: &str, data: Bytes, append: bool) -> Result<(), DataStoreError> {
        let (client, handle) = self.handle(key)?;
        tracing::debug!(blob = %handle, bytes = data.len(), append, "blob put");
        Ok(client.upload_object(&handle, data, false).await?)
    }

    async fn upload(&self, key: &str, src_path: &Path) -> Result<(), DataStoreError> {
        let (client, handle) = self.handle(key)?;
        let data = tokio::fs::read(src_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DataStoreError::NotFound(src_path.display().to_string())
            } else {
                DataStoreError::Io(e)
            }
        })?;
        tracing::debug!(blob = %handle, src = %src_path.display(), "blob upload");
        Ok(client
            .upload_object(&handle, Bytes::from(data), false)
            .await?)
    }

    async fn download(&self, key: &str, target_path: &Path) -> Result<(), DataStoreError> {
        let data = self.get(key, None, 0).await?;
        if let Some(dir) = target_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(target_path, &data).await?;
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<FileStats, DataStoreError> {
        let (client, handle) = self.handle(key)?;
        let props = client.properties(&handle).await?;
        Ok(FileStats::new(props.size, props.last_modified))
    }

    async fn listdir(&self, key: &str) -> Result<Vec<String>, DataStoreError> {
        let client = self.client()?;
        let prefix = list_prefix(key);
        let items = client.list_objects(&self.info.endpoint, &prefix).await?;

        Ok(items
            .into_iter()
            .filter_map(|item| item.name.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use super::{DataStore, DataStoreError, FileStats, StoreInfo};

/// Local filesystem data store rooted at a base directory.
pub struct LocalStore {
    info: StoreInfo,
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            info: StoreInfo::new("file", "file", ""),
            base_path,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a key to its path under the root. Leading separators are
    /// dropped so that `/a/b` and `a/b` name the same file; keys with `..`
    /// or other non-plain components are rejected.
    pub fn object_path(&self, key: &str) -> Result<PathBuf, DataStoreError> {
        let relative = Path::new(normalize_key(key));
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(DataStoreError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(relative))
    }

    /// Open a write handle on `key`, truncating unless `append` is set.
    ///
    /// The file is closed when the handle is dropped; call
    /// [`WriteHandle::finish`] to flush and sync before that.
    pub async fn get_handler(
        &self,
        key: &str,
        append: bool,
    ) -> Result<WriteHandle, DataStoreError> {
        let path = self.object_path(key)?;
        ensure_parent(&path).await?;
        let file = open_for_write(&path, append)
            .await
            .map_err(|e| not_found_or_io(e, key))?;
        Ok(WriteHandle { file, path })
    }
}

fn normalize_key(key: &str) -> &str {
    key.trim_start_matches('/')
}

fn not_found_or_io(err: io::Error, what: &str) -> DataStoreError {
    if err.kind() == io::ErrorKind::NotFound {
        DataStoreError::NotFound(what.to_string())
    } else {
        DataStoreError::Io(err)
    }
}

async fn ensure_parent(path: &Path) -> Result<(), io::Error> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => tokio::fs::create_dir_all(dir).await,
        _ => Ok(()),
    }
}

async fn open_for_write(path: &Path, append: bool) -> Result<File, io::Error> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await
}

/// True when both paths name the same file on disk.
async fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[async_trait]
impl DataStore for LocalStore {
    fn info(&self) -> &StoreInfo {
        &self.info
    }

    async fn get(
        &self,
        key: &str,
        size: Option<u64>,
        offset: u64,
    ) -> Result<Bytes, DataStoreError> {
        let path = self.object_path(key)?;
        let mut file = File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, key))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }

        let mut data = Vec::new();
        match size {
            Some(n) if n > 0 => {
                file.take(n).read_to_end(&mut data).await?;
            }
            _ => {
                file.read_to_end(&mut data).await?;
            }
        }
        Ok(Bytes::from(data))
    }

    async fn put(&self, key: &str, data: Bytes, append: bool) -> Result<(), DataStoreError> {
        let path = self.object_path(key)?;
        ensure_parent(&path).await?;

        // A failed write leaves whatever was written so far in place.
        let mut file = open_for_write(&path, append).await?;
        file.write_all(&data).await?;
        file.flush().await?;
        tracing::debug!(key, bytes = data.len(), append, "local put");
        Ok(())
    }

    async fn upload(&self, key: &str, src_path: &Path) -> Result<(), DataStoreError> {
        let path = self.object_path(key)?;
        if same_file(src_path, &path).await {
            tracing::debug!(key, "upload source is the stored file, skipping copy");
            return Ok(());
        }
        ensure_parent(&path).await?;
        tokio::fs::copy(src_path, &path)
            .await
            .map_err(|e| not_found_or_io(e, &src_path.display().to_string()))?;
        Ok(())
    }

    async fn download(&self, key: &str, target_path: &Path) -> Result<(), DataStoreError> {
        let path = self.object_path(key)?;
        if same_file(&path, target_path).await {
            tracing::debug!(key, "download target is the stored file, skipping copy");
            return Ok(());
        }
        if !path.exists() {
            return Err(DataStoreError::NotFound(key.to_string()));
        }
        ensure_parent(target_path).await?;
        tokio::fs::copy(&path, target_path).await?;
        Ok(())
    }

    async fn stat(&self, key: &str) -> Result<FileStats, DataStoreError> {
        let meta = tokio::fs::metadata(self.object_path(key)?)
            .await
            .map_err(|e| not_found_or_io(e, key))?;
        Ok(FileStats::new(meta.len(), meta.modified()?.into()))
    }

    async fn listdir(&self, key: &str) -> Result<Vec<String>, DataStoreError> {
        let mut entries = tokio::fs::read_dir(self.object_path(key)?)
            .await
            .map_err(|e| not_found_or_io(e, key))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

/// Open file handle returned by [`LocalStore::get_handler`].
///
/// Dropping the handle closes the file.
#[derive(Debug)]
pub struct WriteHandle {
    file: File,
    path: PathBuf,
}

impl WriteHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&mut self, data: impl AsRef<[u8]>) -> Result<(), DataStoreError> {
        self.file.write_all(data.as_ref()).await?;
        Ok(())
    }

    /// Flush pending writes to disk and release the file.
    pub async fn finish(mut self) -> Result<(), DataStoreError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_key_strips_leading_separators() {
        assert_eq!(normalize_key("/a/b.txt"), "a/b.txt");
        assert_eq!(normalize_key("//a"), "a");
        assert_eq!(normalize_key("a/b"), "a/b");
        assert_eq!(normalize_key("/"), "");
    }

    #[test]
    fn test_object_path_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path()).unwrap();
        assert_eq!(
            store.object_path("/a/b.txt").unwrap(),
            dir.path().join("a/b.txt")
        );
        assert_eq!(
            store.object_path("a/b.txt").unwrap(),
            dir.path().join("a/b.txt")
        );
        assert_eq!(store.object_path("/").unwrap(), dir.path().join(""));
    }

    #[test]
    fn test_object_path_rejects_parent_components() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("root")).unwrap();
        for key in ["/../x", "/a/../../x", "..", "/a/.."] {
            assert!(
                matches!(store.object_path(key), Err(DataStoreError::InvalidKey(_))),
                "{key} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_same_file_through_relative_components() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.bin");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let indirect = dir.path().join("sub").join("..").join("x.bin");
        assert!(same_file(&file, &indirect).await);
        assert!(!same_file(&file, &dir.path().join("missing")).await);
    }
}

use anyhow::{Context, anyhow};
use bytes::Bytes;
use stash_core::store::{ByteStream, StoreError, StoreFeatures, StoreResult};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct LocalStoreConfig {
    pub base_path: String,
}

/// Stores objects as files below `base_path`.
///
/// Writes go to a hidden temp file next to the target and are renamed into
/// place once complete, so a path never holds a partial object.
#[derive(Debug, Clone)]
pub struct LocalStore {
    base_path: PathBuf,
}

/// Maps a missing file to [`StoreError::NotFound`].
fn not_found_aware(err: std::io::Error) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound
    } else {
        StoreError::Io(err)
    }
}

impl LocalStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        LocalStore {
            base_path: base_path.into(),
        }
    }

    pub fn create(config: LocalStoreConfig) -> Self {
        LocalStore {
            base_path: config.base_path.into(),
        }
    }

    fn resolve_path(&self, path: &str) -> StoreResult<PathBuf> {
        if path.is_empty() || path.contains("..") || path.starts_with('/') {
            return Err(anyhow!(
                "Invalid path: '{}'. Must be a relative path without '..'.",
                path
            )
            .into());
        }
        Ok(self.base_path.join(path))
    }

    fn temp_path_for(full_path: &Path) -> StoreResult<PathBuf> {
        let file_name = full_path
            .file_name()
            .and_then(|name| name.to_str())
            .context("object path has no file name")?;
        Ok(full_path.with_file_name(format!(
            ".{file_name}.{}.tmp",
            uuid::Uuid::new_v4()
        )))
    }

    async fn write_then_rename(&self, path: &str, stream: ByteStream) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp = TempFile::new(Self::temp_path_for(&full_path)?);
        let mut file = File::create(temp.path()).await?;
        let mut stream_reader = StreamReader::new(stream);
        tokio::io::copy(&mut stream_reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(temp.path(), &full_path).await?;
        temp.persisted();
        Ok(())
    }
}

/// Hidden temp file that is removed when dropped, unless it was renamed into
/// place. Covers failed writes and writes whose future is dropped.
struct TempFile {
    path: Option<PathBuf>,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or(Path::new(""))
    }

    fn persisted(mut self) {
        self.path = None;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        if let Err(err) = std::fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove temp file");
            }
        }
    }
}

#[async_trait::async_trait]
impl stash_core::store::Store for LocalStore {
    /// Writes a stream of bytes to a file.
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<()> {
        self.write_then_rename(path, stream).await
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        let stream = futures::stream::iter([Ok(bytes)]);
        self.write_then_rename(path, Box::new(stream)).await
    }

    /// Returns the features of this store.
    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_rename: true,
        }
    }

    /// Checks if a file exists at the given path.
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let full_path = self.resolve_path(path)?;
        tokio::fs::try_exists(&full_path).await.map_err(Into::into)
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let metadata = tokio::fs::metadata(self.resolve_path(path)?)
            .await
            .map_err(not_found_aware)?;
        Ok(metadata.len())
    }

    async fn open_read_stream(&self, path: &str) -> StoreResult<ByteStream> {
        let full_path = self.resolve_path(path)?;
        let file = File::open(&full_path).await.map_err(not_found_aware)?;
        Ok(Box::new(ReaderStream::new(file)))
    }

    async fn open_read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        let full_path = self.resolve_path(path)?;
        let data = tokio::fs::read(&full_path).await.map_err(not_found_aware)?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        let full_path = self.resolve_path(path)?;
        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        let old_full_path = self.resolve_path(old_path)?;
        let new_full_path = self.resolve_path(new_path)?;

        if let Some(parent) = new_full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::rename(&old_full_path, &new_full_path)
            .await
            .map_err(not_found_aware)
    }
}

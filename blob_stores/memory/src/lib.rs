use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{self, TryStreamExt};
use stash_core::store::{ByteStream, StoreError, StoreFeatures, StoreResult};

#[derive(Debug)]
pub struct MemoryStore {
    files: DashMap<String, Bytes>,
}

impl MemoryStore {
    /// Creates a new, empty `MemoryStore`.
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths of all stored objects, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.iter().map(|entry| entry.key().clone()).collect();
        paths.sort();
        paths
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl stash_core::store::Store for MemoryStore {
    /// Consumes a stream of bytes and stores the concatenated result at the given path.
    /// Nothing is stored if the stream fails.
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<()> {
        let chunks: Vec<Bytes> = stream.try_collect().await?;
        let bytes = Bytes::from(chunks.concat());
        self.files.insert(path.to_string(), bytes);
        Ok(())
    }

    /// Stores a `Bytes` object at the given path.
    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        self.files.insert(path.to_string(), bytes);
        Ok(())
    }

    fn features(&self) -> StoreFeatures {
        StoreFeatures {
            supports_rename: true,
        }
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        Ok(self.files.contains_key(path))
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        let file = self.files.get(path).ok_or(StoreError::NotFound)?;
        Ok(file.len() as u64)
    }

    /// Returns a stream that yields the bytes of the object at the given path.
    async fn open_read_stream(&self, path: &str) -> StoreResult<ByteStream> {
        let bytes = self.open_read_bytes(path).await?;
        Ok(Box::new(stream::iter([Ok(bytes)])))
    }

    async fn open_read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        let file = self.files.get(path).ok_or(StoreError::NotFound)?;
        Ok(file.value().clone())
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.files.remove(path);
        Ok(())
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        if old_path == new_path {
            return Ok(());
        }
        let (_key, value) = self.files.remove(old_path).ok_or(StoreError::NotFound)?;
        self.files.insert(new_path.to_string(), value);
        Ok(())
    }
}

//! Test utilities for `Store` and `ContentFetcher` implementations.
//!
//! # Usage
//!
//! In your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! stash_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use stash_core::testutil::StoreTests;
//!
//! #[tokio::test]
//! async fn test_my_store() {
//!     let store = MyStore::new(...);
//!     StoreTests::new(&store).run_all().await.unwrap();
//! }
//! ```

use crate::{
    fetch::{ContentFetcher, FetchError},
    store::{ByteStream, Store, StoreError, StoreFeatures, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use rand::Rng;
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};
use url::Url;

/// Test suite for `Store` implementations.
///
/// Runs the checks the gateway relies on: streaming writes, `NotFound` for
/// missing objects, idempotent deletes and (if supported) rename.
pub struct StoreTests<'a, S> {
    store: &'a S,
    /// Prefix for test files to avoid conflicts
    prefix: String,
}

impl<'a, S: Store> StoreTests<'a, S> {
    pub fn new(store: &'a S) -> Self {
        let prefix = format!("_test_{}_", rand::rng().random::<u32>());
        Self { store, prefix }
    }

    pub fn with_prefix(store: &'a S, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn path(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Run all tests.
    pub async fn run_all(&self) -> StoreResult<()> {
        self.test_put_get_bytes().await?;
        self.test_put_get_stream().await?;
        self.test_failing_stream().await?;
        self.test_missing().await?;
        self.test_exists().await?;
        self.test_size().await?;
        self.test_delete().await?;
        self.test_overwrite().await?;

        if self.store.features().supports_rename {
            self.test_rename().await?;
        }

        self.cleanup().await
    }

    pub async fn test_put_get_bytes(&self) -> StoreResult<()> {
        let path = self.path("bytes_test.enc");
        let data = Bytes::from_static(b"hello, world!");

        self.store.put_bytes(&path, data.clone()).await?;

        let retrieved = self.store.open_read_bytes(&path).await?;
        assert_eq!(retrieved, data, "retrieved data should match original");

        Ok(())
    }

    pub async fn test_put_get_stream(&self) -> StoreResult<()> {
        let path = self.path("stream_test.enc");
        let data = random_bytes(1024 * 10);

        let chunks: Vec<Result<Bytes, std::io::Error>> = data
            .chunks(1000)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        self.store
            .put_stream(&path, Box::new(futures::stream::iter(chunks)))
            .await?;

        let mut stream = self.store.open_read_stream(&path).await?;
        let mut retrieved = Vec::new();
        while let Some(chunk) = stream.next().await {
            retrieved.extend_from_slice(&chunk?);
        }

        assert_eq!(retrieved, data.as_ref(), "stream data should match");

        Ok(())
    }

    /// A stream error must fail the write instead of being dropped.
    pub async fn test_failing_stream(&self) -> StoreResult<()> {
        let path = self.path("failing_stream_test.enc");
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("upstream failure")),
        ];

        let result = self
            .store
            .put_stream(&path, Box::new(futures::stream::iter(chunks)))
            .await;
        assert!(result.is_err(), "put_stream must report stream errors");

        Ok(())
    }

    pub async fn test_missing(&self) -> StoreResult<()> {
        let path = self.path("missing_test.enc");

        assert!(
            matches!(self.store.size(&path).await, Err(StoreError::NotFound)),
            "size of a missing object should be NotFound"
        );
        assert!(
            matches!(
                self.store.open_read_bytes(&path).await,
                Err(StoreError::NotFound)
            ),
            "reading a missing object should be NotFound"
        );
        assert!(
            matches!(
                self.store.open_read_stream(&path).await,
                Err(StoreError::NotFound)
            ),
            "streaming a missing object should be NotFound"
        );

        Ok(())
    }

    pub async fn test_exists(&self) -> StoreResult<()> {
        let path = self.path("exists_test.enc");

        assert!(
            !self.store.exists(&path).await?,
            "file should not exist before creation"
        );

        self.store
            .put_bytes(&path, Bytes::from_static(b"test"))
            .await?;

        assert!(
            self.store.exists(&path).await?,
            "file should exist after creation"
        );

        Ok(())
    }

    pub async fn test_size(&self) -> StoreResult<()> {
        let path = self.path("size_test.enc");
        let data = Bytes::from(vec![42u8; 12345]);

        self.store.put_bytes(&path, data.clone()).await?;

        let size = self.store.size(&path).await?;
        assert_eq!(size, 12345, "size should match data length");

        Ok(())
    }

    /// Deletes are idempotent.
    pub async fn test_delete(&self) -> StoreResult<()> {
        let path = self.path("delete_test.enc");

        self.store
            .put_bytes(&path, Bytes::from_static(b"to be deleted"))
            .await?;
        self.store.delete(&path).await?;

        assert!(
            !self.store.exists(&path).await?,
            "file should not exist after delete"
        );

        self.store.delete(&path).await?;
        self.store.delete(&self.path("never_written.enc")).await?;

        Ok(())
    }

    pub async fn test_overwrite(&self) -> StoreResult<()> {
        let path = self.path("overwrite_test.enc");

        self.store
            .put_bytes(&path, Bytes::from_static(b"original content"))
            .await?;
        self.store
            .put_bytes(&path, Bytes::from_static(b"new content"))
            .await?;

        let retrieved = self.store.open_read_bytes(&path).await?;
        assert_eq!(
            retrieved.as_ref(),
            b"new content",
            "overwritten content should be new"
        );

        Ok(())
    }

    /// Rename moves the object and replaces an existing target.
    pub async fn test_rename(&self) -> StoreResult<()> {
        let old_path = self.path("rename_old.enc");
        let new_path = self.path("rename_new.enc");

        self.store
            .put_bytes(&new_path, Bytes::from_static(b"stale"))
            .await?;
        self.store
            .put_bytes(&old_path, Bytes::from_static(b"rename me"))
            .await?;

        self.store.rename(&old_path, &new_path).await?;

        assert!(
            !self.store.exists(&old_path).await?,
            "old path should not exist after rename"
        );

        let content = self.store.open_read_bytes(&new_path).await?;
        assert_eq!(
            content.as_ref(),
            b"rename me",
            "content should be preserved after rename"
        );

        Ok(())
    }

    pub async fn cleanup(&self) -> StoreResult<()> {
        for name in [
            "bytes_test.enc",
            "stream_test.enc",
            "failing_stream_test.enc",
            "exists_test.enc",
            "size_test.enc",
            "overwrite_test.enc",
            "rename_old.enc",
            "rename_new.enc",
        ] {
            self.store.delete(&self.path(name)).await?;
        }
        Ok(())
    }
}

/// Generate random bytes for testing.
pub fn random_bytes(len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    Bytes::from(data)
}

/// Counts the calls made against the wrapped store.
#[derive(Debug)]
pub struct CountingStore<S> {
    inner: S,
    puts: AtomicUsize,
    lookups: AtomicUsize,
    reads: AtomicUsize,
    deletes: AtomicUsize,
    renames: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            puts: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            renames: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// `put_stream` and `put_bytes` calls.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// `exists` and `size` calls.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn renames(&self) -> usize {
        self.renames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: Store> Store for CountingStore<S> {
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_stream(path, stream).await
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_bytes(path, bytes).await
    }

    fn features(&self) -> StoreFeatures {
        self.inner.features()
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.exists(path).await
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.size(path).await
    }

    async fn open_read_stream(&self, path: &str) -> StoreResult<ByteStream> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.open_read_stream(path).await
    }

    async fn open_read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.open_read_bytes(path).await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(path).await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        self.renames.fetch_add(1, Ordering::SeqCst);
        self.inner.rename(old_path, new_path).await
    }
}

/// Simulates read-after-write lag: the first `hidden_lookups` calls to
/// `exists` or `size` report the object as missing.
#[derive(Debug)]
pub struct LaggingStore<S> {
    inner: S,
    hidden_lookups: AtomicUsize,
}

impl<S> LaggingStore<S> {
    pub fn new(inner: S, hidden_lookups: usize) -> Self {
        Self {
            inner,
            hidden_lookups: AtomicUsize::new(hidden_lookups),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn hide(&self) -> bool {
        self.hidden_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<S: Store> Store for LaggingStore<S> {
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<()> {
        self.inner.put_stream(path, stream).await
    }

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()> {
        self.inner.put_bytes(path, bytes).await
    }

    fn features(&self) -> StoreFeatures {
        self.inner.features()
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        if self.hide() {
            return Ok(false);
        }
        self.inner.exists(path).await
    }

    async fn size(&self, path: &str) -> StoreResult<u64> {
        if self.hide() {
            return Err(StoreError::NotFound);
        }
        self.inner.size(path).await
    }

    async fn open_read_stream(&self, path: &str) -> StoreResult<ByteStream> {
        self.inner.open_read_stream(path).await
    }

    async fn open_read_bytes(&self, path: &str) -> StoreResult<Bytes> {
        self.inner.open_read_bytes(path).await
    }

    async fn delete(&self, path: &str) -> StoreResult<()> {
        self.inner.delete(path).await
    }

    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()> {
        self.inner.rename(old_path, new_path).await
    }
}

#[derive(Debug, Clone)]
enum Source {
    Body(Bytes),
    Status(u16),
    /// Yields the bytes, then a transport error.
    Broken(Bytes),
    /// Yields the bytes, then never finishes.
    Stalled(Bytes),
}

/// In-memory `ContentFetcher` serving fixed responses per URL.
///
/// Unknown URLs answer with status 404.
#[derive(Debug)]
pub struct StaticFetcher {
    sources: HashMap<Url, Source>,
    chunk_size: usize,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self {
            sources: HashMap::new(),
            chunk_size: 64 * 1024,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_body(mut self, url: Url, body: impl Into<Bytes>) -> Self {
        self.sources.insert(url, Source::Body(body.into()));
        self
    }

    pub fn with_status(mut self, url: Url, status: u16) -> Self {
        self.sources.insert(url, Source::Status(status));
        self
    }

    pub fn with_broken_body(mut self, url: Url, prefix: impl Into<Bytes>) -> Self {
        self.sources.insert(url, Source::Broken(prefix.into()));
        self
    }

    pub fn with_stalled_body(mut self, url: Url, prefix: impl Into<Bytes>) -> Self {
        self.sources.insert(url, Source::Stalled(prefix.into()));
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn chunks(&self, body: &Bytes) -> Vec<Result<Bytes, std::io::Error>> {
        let step = self.chunk_size.max(1);
        (0..body.len())
            .step_by(step)
            .map(|start| Ok(body.slice(start..(start + step).min(body.len()))))
            .collect()
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentFetcher for StaticFetcher {
    async fn fetch(&self, url: &Url) -> Result<ByteStream, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.sources.get(url) {
            Some(Source::Body(body)) => Ok(Box::new(futures::stream::iter(self.chunks(body)))),
            Some(Source::Broken(prefix)) => {
                let mut items = self.chunks(prefix);
                items.push(Err(FetchError::Transport(anyhow::anyhow!(
                    "connection reset while streaming {url}"
                ))
                .into_io()));
                Ok(Box::new(futures::stream::iter(items)))
            }
            Some(Source::Stalled(prefix)) => Ok(Box::new(
                futures::stream::iter(self.chunks(prefix)).chain(futures::stream::pending()),
            )),
            Some(Source::Status(status)) => Err(FetchError::Status { status: *status }),
            None => Err(FetchError::Status { status: 404 }),
        }
    }
}

/// Assert that two byte slices are equal with a descriptive message.
#[macro_export]
macro_rules! assert_bytes_eq {
    ($left:expr, $right:expr) => {
        assert_eq!(
            $left.as_ref() as &[u8],
            $right.as_ref() as &[u8],
            "byte content mismatch"
        );
    };
    ($left:expr, $right:expr, $($arg:tt)+) => {
        assert_eq!(
            $left.as_ref() as &[u8],
            $right.as_ref() as &[u8],
            $($arg)+
        );
    };
}

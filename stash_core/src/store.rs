use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use thiserror::Error;

/// Boxed byte stream passed between stores, fetchers and pipeline stages.
pub type ByteStream = Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin + 'static>;

pub type StoreResult<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested object does not exist (yet).
    #[error("object not found")]
    NotFound,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Object store contract consumed by the gateway.
///
/// Implementations report a missing object with [`StoreError::NotFound`] and
/// nothing else; every other variant is treated as a store failure.
#[async_trait]
pub trait Store: std::fmt::Debug + Send + Sync + 'static {
    /// Consumes `stream` and stores it under `path`. Resolves once the backend
    /// acknowledged the write. If the stream yields an error the write must
    /// fail and the error must be returned.
    async fn put_stream(&self, path: &str, stream: ByteStream) -> StoreResult<()>;

    async fn put_bytes(&self, path: &str, bytes: Bytes) -> StoreResult<()>;

    fn features(&self) -> StoreFeatures;

    /// `Ok(false)` for a missing object.
    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Byte length of the stored object.
    async fn size(&self, path: &str) -> StoreResult<u64>;

    async fn open_read_stream(&self, path: &str) -> StoreResult<ByteStream>;

    async fn open_read_bytes(&self, path: &str) -> StoreResult<Bytes>;

    /// Idempotent: deleting a missing object succeeds.
    async fn delete(&self, path: &str) -> StoreResult<()>;

    /// Moves `old_path` to `new_path`, replacing any existing object.
    /// Only called when [`StoreFeatures::supports_rename`] is set.
    async fn rename(&self, old_path: &str, new_path: &str) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreFeatures {
    /// `rename` makes the object visible under the new path atomically.
    pub supports_rename: bool,
}

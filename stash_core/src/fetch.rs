use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::store::ByteStream;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("source responded with status {status}")]
    Status { status: u16 },
    #[error("source transfer failed: {0}")]
    Transport(#[source] anyhow::Error),
}

impl FetchError {
    /// Wraps a transport failure so it can travel inside a [`ByteStream`].
    pub fn into_io(self) -> std::io::Error {
        std::io::Error::other(self)
    }

    /// Recovers a `FetchError` previously wrapped with [`FetchError::into_io`].
    pub fn from_io(err: &std::io::Error) -> Option<&FetchError> {
        err.get_ref().and_then(|inner| inner.downcast_ref())
    }
}

/// Source of attachment bytes for the write path.
#[async_trait]
pub trait ContentFetcher: std::fmt::Debug + Send + Sync + 'static {
    /// Starts downloading `url`. A non-success response is reported as
    /// [`FetchError::Status`] before any byte is produced; failures while the
    /// body streams surface as stream items recoverable with
    /// [`FetchError::from_io`].
    async fn fetch(&self, url: &Url) -> Result<ByteStream, FetchError>;
}

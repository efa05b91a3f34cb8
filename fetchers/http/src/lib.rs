use futures::StreamExt;
use stash_core::{ByteStream, ContentFetcher, FetchError};
use std::sync::Arc;
use tokio::sync::Semaphore;
use url::Url;

/// Downloads attachment sources over HTTP(S).
///
/// At most `max_concurrent_requests` bodies are in flight at once; a permit
/// is held until the returned stream is dropped.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http_client: reqwest::Client,
    rate_limiter: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(max_concurrent_requests: usize) -> Self {
        Self::with_client(reqwest::Client::new(), max_concurrent_requests)
    }

    pub fn with_client(http_client: reqwest::Client, max_concurrent_requests: usize) -> Self {
        Self {
            http_client,
            rate_limiter: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        }
    }
}

#[async_trait::async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<ByteStream, FetchError> {
        let permit = self
            .rate_limiter
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| FetchError::Transport(e.into()))?;

        tracing::debug!(%url, "fetching attachment source");
        let res = self
            .http_client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.into()))?;

        if !res.status().is_success() {
            tracing::warn!(%url, status = %res.status(), "source request failed");
            return Err(FetchError::Status {
                status: res.status().as_u16(),
            });
        }

        Ok(Box::new(res.bytes_stream().map(move |chunk| {
            let _permit = &permit;
            chunk.map_err(|e| FetchError::Transport(e.into()).into_io())
        })))
    }
}

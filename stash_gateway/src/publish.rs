//! Two-phase write support: error latching for the upload stream and the
//! staging → published promotion.

use std::{
    io,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use stash_core::{ObjectName, Store, StoreResult};

/// Removes a staging object unless the write published it.
///
/// Dropping the guard (a cancelled write) spawns the removal on the current
/// runtime; error paths call [`StagingGuard::discard`] and wait for it.
pub(crate) struct StagingGuard {
    store: Arc<dyn Store>,
    name: Option<ObjectName>,
}

impl StagingGuard {
    pub(crate) fn new(store: Arc<dyn Store>, name: ObjectName) -> Self {
        Self {
            store,
            name: Some(name),
        }
    }

    pub(crate) async fn discard(mut self) {
        if let Some(name) = self.name.take() {
            discard(self.store.as_ref(), &name).await;
        }
    }

    /// The staging object was published; leave it alone.
    pub(crate) fn defuse(mut self) {
        self.name = None;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        let Some(name) = self.name.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = self.store.clone();
                tracing::debug!(%name, "write dropped, removing staging object");
                handle.spawn(async move {
                    discard(store.as_ref(), &name).await;
                });
            }
            Err(_) => {
                tracing::warn!(%name, "no runtime to remove staging object");
            }
        }
    }
}

/// Remembers the first error of the wrapped stream.
///
/// The store receives a plain copy of the error (same kind and message) while
/// the original, with its typed payload, stays with the gateway. A store that
/// drops or rewrites stream errors therefore cannot hide a failed upload.
pub(crate) struct ErrorLatch<S> {
    stream: S,
    slot: Arc<Mutex<Option<io::Error>>>,
}

#[derive(Clone)]
pub(crate) struct LatchHandle {
    slot: Arc<Mutex<Option<io::Error>>>,
}

impl LatchHandle {
    pub(crate) fn take(&self) -> Option<io::Error> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl<S> ErrorLatch<S> {
    pub(crate) fn new(stream: S) -> (Self, LatchHandle) {
        let slot = Arc::new(Mutex::new(None));
        let handle = LatchHandle { slot: slot.clone() };
        (Self { stream, slot }, handle)
    }
}

impl<S> Stream for ErrorLatch<S>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
{
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(Err(err))) => {
                let forwarded = io::Error::new(err.kind(), err.to_string());
                let mut slot = this.slot.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.is_none() {
                    *slot = Some(err);
                }
                Poll::Ready(Some(Err(forwarded)))
            }
            other => other,
        }
    }
}

/// Makes the object at `staging` visible under `published`.
///
/// Rename when the store supports it, otherwise copy then delete. A staging
/// object left behind by a failed delete is invisible to readers and only
/// logged.
pub(crate) async fn publish(
    store: &dyn Store,
    staging: &ObjectName,
    published: &ObjectName,
) -> StoreResult<()> {
    if store.features().supports_rename {
        tracing::debug!(name = %published, mode = "rename", "publishing object");
        return store.rename(staging.as_str(), published.as_str()).await;
    }

    tracing::debug!(name = %published, mode = "copy", "publishing object");
    let stream = store.open_read_stream(staging.as_str()).await?;
    store.put_stream(published.as_str(), stream).await?;
    discard(store, staging).await;
    Ok(())
}

/// Best-effort removal of a staging object.
pub(crate) async fn discard(store: &dyn Store, staging: &ObjectName) {
    if let Err(err) = store.delete(staging.as_str()).await {
        tracing::warn!(name = %staging, error = %err, "failed to remove staging object");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, stream};
    use stash_core::{ObjectIdentity, PipelineError};
    use stash_store_memory::MemoryStore;

    #[tokio::test]
    async fn latch_keeps_first_typed_error() {
        let items = vec![
            Ok(Bytes::from_static(b"a")),
            Err(PipelineError::Decrypt.into_io()),
            Err(io::Error::other("second")),
        ];
        let (mut latched, handle) = ErrorLatch::new(stream::iter(items));

        assert!(latched.next().await.unwrap().is_ok());
        let forwarded = latched.next().await.unwrap().unwrap_err();
        assert_eq!(forwarded.kind(), io::ErrorKind::InvalidData);
        assert!(PipelineError::from_io(&forwarded).is_none());
        let _ = latched.next().await;

        let original = handle.take().unwrap();
        assert!(matches!(
            PipelineError::from_io(&original),
            Some(PipelineError::Decrypt)
        ));
        assert!(handle.take().is_none());
    }

    #[tokio::test]
    async fn dropped_guard_removes_staging_object() {
        let store = Arc::new(MemoryStore::new());
        let identity = ObjectIdentity::new("1", "2", "3", 4);
        let staging = ObjectName::staging(&identity, "dropped");
        store
            .put_bytes(staging.as_str(), Bytes::from_static(b"partial"))
            .await
            .unwrap();

        drop(StagingGuard::new(store.clone(), staging.clone()));
        for _ in 0..10 {
            if store.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(store.is_empty(), "left behind: {:?}", store.paths());

        store
            .put_bytes(staging.as_str(), Bytes::from_static(b"kept"))
            .await
            .unwrap();
        StagingGuard::new(store.clone(), staging.clone()).defuse();
        tokio::task::yield_now().await;
        assert!(store.exists(staging.as_str()).await.unwrap());
    }

    #[tokio::test]
    async fn publish_by_rename() {
        let store = MemoryStore::new();
        let identity = ObjectIdentity::new("1", "2", "3", 4);
        let staging = ObjectName::staging(&identity, "w");
        let published = ObjectName::published(&identity);

        store
            .put_bytes(staging.as_str(), Bytes::from_static(b"body"))
            .await
            .unwrap();
        publish(&store, &staging, &published).await.unwrap();

        assert_eq!(store.paths(), vec![published.to_string()]);
    }
}

//! Read/write orchestration for encrypted attachment objects.
//!
//! [`StorageGateway`] ties the pieces of `stash_core` together:
//!
//! - **write**: size gate → fetch source → seal → staging object → publish
//! - **read**: derive name → size lookup (one delayed retry) → open → unseal
//!
//! Readers only ever look at the published name, so a partially written
//! object is never observable.

mod config;
mod error;
mod publish;

use std::{fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use futures::TryStreamExt;
use stash_core::{
    ByteStream, ContentFetcher, KeyDeriver, ObjectIdentity, ObjectName, Store, StoreError,
    TierTable, seal, unseal,
};
use url::Url;

pub use config::{DEFAULT_RETRY_DELAY_MS, GatewayConfig};
pub use error::{GatewayError, GatewayResult};

/// A published object opened for reading.
pub struct StoredFile {
    /// Decrypted, decompressed content. Tampering surfaces as a terminal
    /// stream error carrying a `PipelineError`.
    pub stream: ByteStream,
    /// Stored (encrypted) byte length.
    pub size: u64,
    pub name: ObjectName,
}

impl StoredFile {
    /// Reads the whole plaintext into memory.
    pub async fn read_to_end(self) -> GatewayResult<Bytes> {
        let chunks: Vec<Bytes> = self
            .stream
            .try_collect()
            .await
            .map_err(|err| GatewayError::from_stream_error(err, GatewayError::store_stream))?;
        Ok(Bytes::from(chunks.concat()))
    }
}

impl fmt::Debug for StoredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredFile")
            .field("size", &self.size)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Found(StoredFile),
    /// Not visible under its published name, even after the retry.
    Absent,
}

impl FetchOutcome {
    pub fn is_absent(&self) -> bool {
        matches!(self, FetchOutcome::Absent)
    }

    pub fn found(self) -> Option<StoredFile> {
        match self {
            FetchOutcome::Found(file) => Some(file),
            FetchOutcome::Absent => None,
        }
    }
}

#[derive(Clone)]
pub struct StorageGateway {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn ContentFetcher>,
    deriver: KeyDeriver,
    tiers: Arc<TierTable>,
    retry_delay: Duration,
}

impl StorageGateway {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn ContentFetcher>,
        config: GatewayConfig,
    ) -> GatewayResult<Self> {
        config.validate()?;
        let retry_delay = config.retry_delay();
        Ok(Self {
            store,
            fetcher,
            deriver: KeyDeriver::new(config.secret_salt),
            tiers: Arc::new(config.tiers),
            retry_delay,
        })
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Byte ceiling for `tier`; unknown tiers get the default ceiling.
    pub fn check_max_attachment_size(&self, tier: u8) -> u64 {
        self.tiers.max_attachment_size(tier)
    }

    /// Published name of the object for `identity`.
    pub fn object_name(&self, identity: &ObjectIdentity) -> ObjectName {
        ObjectName::published(identity)
    }

    /// Downloads `source_url`, seals it and stores it under the name derived
    /// from `identity`.
    ///
    /// Returns once the store acknowledged the published object. The size
    /// gate runs before any I/O. Every write streams into its own staging
    /// object; concurrent writers of one identity each publish a complete
    /// object and the last rename wins. On failure, or when the future is
    /// dropped, nothing is published and the staging object is removed on a
    /// best-effort basis.
    pub async fn download_file(
        &self,
        identity: &ObjectIdentity,
        tier: u8,
        source_url: &Url,
    ) -> GatewayResult<ObjectName> {
        let ceiling = self.check_max_attachment_size(tier);
        if identity.file_size > ceiling {
            tracing::info!(
                size = identity.file_size,
                ceiling,
                tier,
                "rejecting oversized attachment"
            );
            return Err(GatewayError::Oversize {
                size: identity.file_size,
                ceiling,
                tier,
            });
        }

        let write_id = uuid::Uuid::new_v4().simple().to_string();
        let staging = ObjectName::staging(identity, &write_id);
        let published = ObjectName::published(identity);
        tracing::debug!(name = %published, %source_url, "downloading attachment");

        let source = self.fetcher.fetch(source_url).await?;
        let material = self.deriver.material(identity);
        let (sealed, latch) = publish::ErrorLatch::new(seal(source, &material));
        drop(material);

        let guard = publish::StagingGuard::new(self.store.clone(), staging.clone());
        let put = self.store.put_stream(staging.as_str(), Box::new(sealed)).await;
        if let Some(err) = latch.take() {
            guard.discard().await;
            return Err(GatewayError::from_stream_error(
                err,
                GatewayError::source_stream,
            ));
        }
        if let Err(err) = put {
            guard.discard().await;
            return Err(err.into());
        }

        if let Err(err) = publish::publish(self.store.as_ref(), &staging, &published).await {
            guard.discard().await;
            return Err(err.into());
        }
        guard.defuse();

        tracing::info!(name = %published, "stored attachment");
        Ok(published)
    }

    /// Opens the object for `identity`.
    ///
    /// A missing object is looked up once more after the retry delay, to ride
    /// out read-after-write lag of the store. `Absent` is only returned when
    /// both lookups found nothing; any other store error is returned as is.
    pub async fn fetch_file(&self, identity: &ObjectIdentity) -> GatewayResult<FetchOutcome> {
        let name = ObjectName::published(identity);

        let size = match self.lookup_size(&name).await? {
            Some(size) => size,
            None => {
                tracing::debug!(%name, delay = ?self.retry_delay, "object not visible, retrying");
                tokio::time::sleep(self.retry_delay).await;
                match self.lookup_size(&name).await? {
                    Some(size) => size,
                    None => {
                        tracing::debug!(%name, "object absent");
                        return Ok(FetchOutcome::Absent);
                    }
                }
            }
        };

        let body = match self.store.open_read_stream(name.as_str()).await {
            Ok(body) => body,
            Err(StoreError::NotFound) => {
                tracing::debug!(%name, "object vanished before read");
                return Ok(FetchOutcome::Absent);
            }
            Err(err) => return Err(err.into()),
        };

        let material = self.deriver.material(identity);
        Ok(FetchOutcome::Found(StoredFile {
            stream: unseal(body, &material),
            size,
            name,
        }))
    }

    async fn lookup_size(&self, name: &ObjectName) -> GatewayResult<Option<u64>> {
        match self.store.size(name.as_str()).await {
            Ok(size) => Ok(Some(size)),
            Err(StoreError::NotFound) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the object called `name`. Deleting a missing object succeeds.
    pub async fn delete_file(&self, name: impl AsRef<str>) -> GatewayResult<()> {
        let name = name.as_ref();
        match self.store.delete(name).await {
            Ok(()) | Err(StoreError::NotFound) => {
                tracing::debug!(name, "deleted object");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Deletes the published object for `identity`.
    pub async fn delete_identity(&self, identity: &ObjectIdentity) -> GatewayResult<()> {
        self.delete_file(self.object_name(identity)).await
    }

    /// Whether the published object for `identity` exists. Only a missing
    /// object yields `false`; other store errors are returned.
    pub async fn check_file_exists(&self, identity: &ObjectIdentity) -> GatewayResult<bool> {
        let name = ObjectName::published(identity);
        match self.store.exists(name.as_str()).await {
            Ok(exists) => Ok(exists),
            Err(StoreError::NotFound) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl fmt::Debug for StorageGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageGateway")
            .field("store", &self.store)
            .field("fetcher", &self.fetcher)
            .field("tiers", &self.tiers)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

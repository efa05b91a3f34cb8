use stash_core::{FetchError, PipelineError, StoreError};
use std::io;
use thiserror::Error;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("attachment of {size} bytes exceeds the {ceiling} byte ceiling of tier {tier}")]
    Oversize { size: u64, ceiling: u64, tier: u8 },
    #[error("source fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("pipeline failed: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
    #[error("invalid configuration: {0}")]
    Config(#[source] anyhow::Error),
}

impl GatewayError {
    /// Classifies an error that travelled through a byte stream back to the
    /// layer that produced it. Untyped errors are attributed to `fallback`.
    pub(crate) fn from_stream_error(
        err: io::Error,
        fallback: impl FnOnce(io::Error) -> GatewayError,
    ) -> GatewayError {
        if PipelineError::from_io(&err).is_none() && FetchError::from_io(&err).is_none() {
            return fallback(err);
        }
        let kind = err.kind();
        let Some(inner) = err.into_inner() else {
            return fallback(io::Error::from(kind));
        };
        match inner.downcast::<PipelineError>() {
            Ok(pipeline) => GatewayError::Pipeline(*pipeline),
            Err(inner) => match inner.downcast::<FetchError>() {
                Ok(fetch) => GatewayError::Fetch(*fetch),
                Err(inner) => fallback(io::Error::new(kind, inner)),
            },
        }
    }

    /// Attributes an untyped error on the write path to the source.
    pub(crate) fn source_stream(err: io::Error) -> GatewayError {
        GatewayError::Fetch(FetchError::Transport(err.into()))
    }

    /// Attributes an untyped error on the read path to the store.
    pub(crate) fn store_stream(err: io::Error) -> GatewayError {
        GatewayError::Store(StoreError::Io(err))
    }
}

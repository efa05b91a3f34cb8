//! Streaming compress/encrypt pipeline.
//!
//! Every stage is a [`Transform`]: it turns input chunks into output chunks
//! and may hold back a bounded amount of state until [`Transform::finish`].
//! [`TransformStream`] lifts a transform over any byte stream, so stages are
//! chained by wrapping streams:
//!
//! ```text
//! write: source -> GzipCompress -> CbcEncrypt -> store   (seal)
//! read:  store  -> CbcDecrypt -> GzipDecompress -> caller (unseal)
//! ```
//!
//! Error contract: the first error produced by a stage or received from
//! upstream is yielded exactly once and the stream is fused afterwards.
//! Upstream errors pass through later stages untouched, so a consumer always
//! sees the error of the stage that actually failed.

mod cipher;
mod compress;

use std::{
    io,
    pin::Pin,
    task::{Context, Poll, ready},
};

use bytes::Bytes;
use futures_core::{FusedStream, Stream};
use thiserror::Error;

use crate::{derive::EncryptionMaterial, store::ByteStream};

pub use cipher::{CbcDecrypt, CbcEncrypt};
pub use compress::{GzipCompress, GzipDecompress};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("compression failed: {0}")]
    Compress(#[source] io::Error),
    #[error("decompression failed: {0}")]
    Decompress(#[source] io::Error),
    #[error("decryption failed: invalid ciphertext or wrong key material")]
    Decrypt,
}

impl PipelineError {
    pub fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::InvalidData, self)
    }

    /// Recovers the stage error carried by an item of a pipeline stream.
    pub fn from_io(err: &io::Error) -> Option<&PipelineError> {
        err.get_ref().and_then(|inner| inner.downcast_ref())
    }
}

/// One stage of the pipeline.
pub trait Transform: Send + Unpin + 'static {
    /// Processes the next input chunk. May return an empty buffer when the
    /// stage needs more input before it can emit anything.
    fn update(&mut self, chunk: &[u8]) -> Result<Bytes, PipelineError>;

    /// Flushes held-back state after the last input chunk.
    fn finish(&mut self) -> Result<Bytes, PipelineError>;
}

/// Applies a [`Transform`] to every chunk of `S`.
pub struct TransformStream<S, T> {
    stream: S,
    transform: T,
    done: bool,
}

impl<S, T> TransformStream<S, T> {
    pub fn new(stream: S, transform: T) -> Self {
        Self {
            stream,
            transform,
            done: false,
        }
    }
}

impl<S, T> Stream for TransformStream<S, T>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
    T: Transform,
{
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }

            let output = match ready!(Pin::new(&mut this.stream).poll_next(cx)) {
                Some(Ok(chunk)) => this.transform.update(&chunk),
                Some(Err(err)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    this.done = true;
                    this.transform.finish()
                }
            };

            match output {
                Ok(bytes) if bytes.is_empty() => continue,
                Ok(bytes) => return Poll::Ready(Some(Ok(bytes))),
                Err(err) => {
                    this.done = true;
                    tracing::debug!(error = %err, "pipeline stage failed");
                    return Poll::Ready(Some(Err(err.into_io())));
                }
            }
        }
    }
}

impl<S, T> FusedStream for TransformStream<S, T>
where
    S: Stream<Item = Result<Bytes, io::Error>> + Unpin,
    T: Transform,
{
    fn is_terminated(&self) -> bool {
        self.done
    }
}

/// Chains transforms onto a byte stream.
pub trait TransformExt: Stream<Item = Result<Bytes, io::Error>> + Unpin + Sized {
    fn through<T: Transform>(self, transform: T) -> TransformStream<Self, T> {
        TransformStream::new(self, transform)
    }
}

impl<S> TransformExt for S where S: Stream<Item = Result<Bytes, io::Error>> + Unpin {}

/// Write transform: compress, then encrypt.
pub fn seal<S>(stream: S, material: &EncryptionMaterial) -> ByteStream
where
    S: Stream<Item = Result<Bytes, io::Error>> + Send + Unpin + 'static,
{
    Box::new(
        stream
            .through(GzipCompress::new())
            .through(CbcEncrypt::new(material)),
    )
}

/// Read transform: decrypt, then decompress.
pub fn unseal<S>(stream: S, material: &EncryptionMaterial) -> ByteStream
where
    S: Stream<Item = Result<Bytes, io::Error>> + Send + Unpin + 'static,
{
    Box::new(
        stream
            .through(CbcDecrypt::new(material))
            .through(GzipDecompress::new()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::{IV_LEN, KEY_LEN};
    use futures::{StreamExt, stream};
    use rand::Rng;

    fn material() -> EncryptionMaterial {
        EncryptionMaterial::from_parts(
            *b"0123456789abcdef0123456789abcdef",
            *b"fedcba9876543210",
        )
    }

    /// Poorly compressible bytes.
    fn noise(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::rng().fill(&mut data[..]);
        data
    }

    fn text(lines: usize) -> Vec<u8> {
        (0..lines)
            .flat_map(|i| format!("attachment line {i} of the payload\n").into_bytes())
            .collect()
    }

    fn chunked(data: &[u8], chunk: usize) -> stream::Iter<std::vec::IntoIter<io::Result<Bytes>>> {
        let chunks: Vec<io::Result<Bytes>> = if data.is_empty() {
            vec![]
        } else {
            data.chunks(chunk.max(1))
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect()
        };
        stream::iter(chunks)
    }

    async fn collect(mut stream: impl Stream<Item = io::Result<Bytes>> + Unpin) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    async fn sealed(data: &[u8], material: &EncryptionMaterial) -> Vec<u8> {
        collect(seal(chunked(data, 4096), material)).await.unwrap()
    }

    #[tokio::test]
    async fn round_trip_across_sizes_and_chunkings() {
        let material = material();
        let sizes = [0, 1, 15, 16, 17, 31, 4095, 65_539, 3 * 1024 * 1024 + 7];

        for size in sizes {
            for data in [noise(size), text(size / 36 + 1)] {
                for chunk in [1usize, 7, 16, 4096, 1 << 20] {
                    if chunk < 4096 && data.len() > 70_000 {
                        continue;
                    }
                    let ciphertext = collect(seal(chunked(&data, chunk), &material)).await.unwrap();
                    assert_eq!(ciphertext.len() % 16, 0, "ciphertext is block aligned");

                    let plaintext = collect(unseal(chunked(&ciphertext, chunk.max(3) - 2), &material))
                        .await
                        .unwrap();
                    assert_eq!(plaintext, data, "size {size} chunk {chunk}");
                }
            }
        }
    }

    #[tokio::test]
    async fn empty_input_still_produces_a_sealed_object() {
        let material = material();
        let ciphertext = sealed(b"", &material).await;
        assert!(!ciphertext.is_empty());

        let plaintext = collect(unseal(chunked(&ciphertext, 16), &material)).await.unwrap();
        assert!(plaintext.is_empty());
    }

    #[tokio::test]
    async fn any_flipped_key_or_iv_bit_fails() {
        let material = material();
        let data = text(200);
        let ciphertext = sealed(&data, &material).await;

        for bit in 0..KEY_LEN * 8 {
            let mut key = *material.key();
            key[bit / 8] ^= 1 << (bit % 8);
            let wrong = EncryptionMaterial::from_parts(key, *material.iv());
            let result = collect(unseal(chunked(&ciphertext, 4096), &wrong)).await;
            let err = result.expect_err("flipped key bit must not decrypt");
            assert!(PipelineError::from_io(&err).is_some(), "key bit {bit}: {err}");
        }

        for bit in 0..IV_LEN * 8 {
            let mut iv = *material.iv();
            iv[bit / 8] ^= 1 << (bit % 8);
            let wrong = EncryptionMaterial::from_parts(*material.key(), iv);
            let result = collect(unseal(chunked(&ciphertext, 4096), &wrong)).await;
            let err = result.expect_err("flipped iv bit must not decrypt");
            assert!(PipelineError::from_io(&err).is_some(), "iv bit {bit}: {err}");
        }
    }

    #[tokio::test]
    async fn corrupted_or_truncated_ciphertext_fails() {
        let material = material();
        let data = noise(10_000);
        let ciphertext = sealed(&data, &material).await;

        let mut corrupted = ciphertext.clone();
        let middle = corrupted.len() / 2;
        corrupted[middle] ^= 0x40;
        assert!(collect(unseal(chunked(&corrupted, 512), &material)).await.is_err());

        let truncated = &ciphertext[..ciphertext.len() - 16];
        assert!(collect(unseal(chunked(truncated, 512), &material)).await.is_err());

        let unaligned = &ciphertext[..ciphertext.len() - 3];
        let err = collect(unseal(chunked(unaligned, 512), &material))
            .await
            .unwrap_err();
        assert!(matches!(
            PipelineError::from_io(&err),
            Some(PipelineError::Decrypt)
        ));
    }

    #[tokio::test]
    async fn upstream_error_terminates_once_and_is_not_relabelled() {
        let material = material();
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"first chunk")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "source went away")),
            Ok(Bytes::from_static(b"never read")),
        ]);

        let items: Vec<io::Result<Bytes>> = seal(source, &material).collect().await;
        let errors: Vec<&io::Error> = items.iter().filter_map(|i| i.as_ref().err()).collect();

        assert_eq!(errors.len(), 1);
        assert!(items.last().unwrap().is_err(), "error is the final item");
        assert_eq!(errors[0].kind(), io::ErrorKind::ConnectionReset);
        assert!(PipelineError::from_io(errors[0]).is_none());
    }

    #[tokio::test]
    async fn stage_error_passes_through_downstream_stage() {
        let material = material();
        let ciphertext = sealed(&text(50), &material).await;
        let unaligned = ciphertext[..ciphertext.len() - 1].to_vec();

        // The decrypt stage fails; the decompress stage behind it must hand
        // that error on instead of reporting its own.
        let mut stream = unseal(chunked(&unaligned, 7), &material);
        let mut errors = Vec::new();
        while let Some(item) = stream.next().await {
            if let Err(err) = item {
                errors.push(err);
            }
        }

        assert_eq!(errors.len(), 1);
        assert!(matches!(
            PipelineError::from_io(&errors[0]),
            Some(PipelineError::Decrypt)
        ));
    }

    #[tokio::test]
    async fn stream_is_fused_after_completion() {
        let mut stream = TransformStream::new(chunked(b"abc", 1), GzipCompress::new());
        while stream.next().await.is_some() {}
        assert!(stream.is_terminated());
        assert!(stream.next().await.is_none());
    }
}

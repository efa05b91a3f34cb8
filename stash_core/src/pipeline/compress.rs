use std::{
    io::{self, Write},
    mem,
    sync::LazyLock,
};

use bytes::Bytes;
use flate2::{Compression, GzBuilder, write::GzDecoder, write::GzEncoder};

use super::{PipelineError, Transform};

const GZIP_HEADER_LEN: usize = 10;
/// "unknown" operating system, keeps the header independent of the host.
const GZIP_OS_UNKNOWN: u8 = 255;

fn gzip_builder() -> GzBuilder {
    GzBuilder::new().mtime(0).operating_system(GZIP_OS_UNKNOWN)
}

/// Header every object written by [`GzipCompress`] starts with.
static CANONICAL_HEADER: LazyLock<Vec<u8>> = LazyLock::new(|| {
    gzip_builder()
        .write(Vec::new(), Compression::default())
        .finish()
        .ok()
        .and_then(|member| member.get(..GZIP_HEADER_LEN).map(<[u8]>::to_vec))
        .unwrap_or_default()
});

fn already_finished() -> io::Error {
    io::Error::other("stage already finished")
}

/// Gzip compression with a fixed header (no mtime, no file name).
pub struct GzipCompress {
    encoder: Option<GzEncoder<Vec<u8>>>,
}

impl GzipCompress {
    pub fn new() -> Self {
        Self {
            encoder: Some(gzip_builder().write(Vec::new(), Compression::default())),
        }
    }
}

impl Default for GzipCompress {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for GzipCompress {
    fn update(&mut self, chunk: &[u8]) -> Result<Bytes, PipelineError> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| PipelineError::Compress(already_finished()))?;
        encoder.write_all(chunk).map_err(PipelineError::Compress)?;
        Ok(Bytes::from(mem::take(encoder.get_mut())))
    }

    fn finish(&mut self) -> Result<Bytes, PipelineError> {
        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| PipelineError::Compress(already_finished()))?;
        encoder
            .finish()
            .map(Bytes::from)
            .map_err(PipelineError::Compress)
    }
}

/// Gzip decompression, inverse of [`GzipCompress`].
///
/// The member header must match the canonical header byte for byte. Gzip
/// readers ignore several header fields, and without this check a damaged
/// first cipher block could still decode.
pub struct GzipDecompress {
    header: Vec<u8>,
    header_checked: bool,
    decoder: Option<GzDecoder<Vec<u8>>>,
}

impl GzipDecompress {
    pub fn new() -> Self {
        Self {
            header: Vec::with_capacity(GZIP_HEADER_LEN),
            header_checked: false,
            decoder: Some(GzDecoder::new(Vec::new())),
        }
    }

    fn feed(&mut self, input: &[u8]) -> Result<(), PipelineError> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| PipelineError::Decompress(already_finished()))?;
        decoder.write_all(input).map_err(PipelineError::Decompress)
    }
}

impl Default for GzipDecompress {
    fn default() -> Self {
        Self::new()
    }
}

impl Transform for GzipDecompress {
    fn update(&mut self, chunk: &[u8]) -> Result<Bytes, PipelineError> {
        let mut input = chunk;

        if !self.header_checked {
            let take = (GZIP_HEADER_LEN - self.header.len()).min(input.len());
            self.header.extend_from_slice(&input[..take]);
            input = &input[take..];

            if self.header.len() < GZIP_HEADER_LEN {
                return Ok(Bytes::new());
            }
            if self.header != *CANONICAL_HEADER {
                return Err(PipelineError::Decompress(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unexpected gzip header",
                )));
            }
            self.header_checked = true;
            let header = mem::take(&mut self.header);
            self.feed(&header)?;
        }

        if !input.is_empty() {
            self.feed(input)?;
        }

        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| PipelineError::Decompress(already_finished()))?;
        Ok(Bytes::from(mem::take(decoder.get_mut())))
    }

    fn finish(&mut self) -> Result<Bytes, PipelineError> {
        if !self.header_checked {
            return Err(PipelineError::Decompress(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated gzip header",
            )));
        }
        let decoder = self
            .decoder
            .take()
            .ok_or_else(|| PipelineError::Decompress(already_finished()))?;
        decoder
            .finish()
            .map(Bytes::from)
            .map_err(PipelineError::Decompress)
    }
}

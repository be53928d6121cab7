//! Payload compression.
//!
//! The import API expects the body of a `msgpack.gz` import to be a single gzip member wrapping the concatenated rows.

use std::io;

use async_compression::tokio::{bufread::GzipDecoder, write::GzipEncoder};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

/// Format identifier for gzip-compressed MessagePack rows, as used in import request paths.
pub const MSGPACK_GZ_FORMAT: &str = "msgpack.gz";

/// Compresses the given bytes with gzip.
///
/// # Errors
///
/// If the encoder fails to write or finalize the gzip stream, an error is returned.
pub async fn compress(input: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzipEncoder::new(Vec::with_capacity(input.len() / 4));
    encoder.write_all(input).await?;
    encoder.shutdown().await?;

    Ok(encoder.into_inner())
}

/// Decompresses the given gzip stream.
///
/// # Errors
///
/// If the input is not a valid gzip stream, an error is returned.
pub async fn decompress(input: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzipDecoder::new(input);
    let mut output = Vec::new();
    decoder.read_to_end(&mut output).await?;

    Ok(output)
}

/// Returns a gzip stream containing zero bytes.
///
/// # Errors
///
/// If the encoder fails to finalize the gzip stream, an error is returned.
pub async fn empty_payload() -> io::Result<Vec<u8>> {
    compress(&[]).await
}

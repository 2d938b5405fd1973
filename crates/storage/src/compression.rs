//! Gzip helpers for stored artifacts.

use async_compression::tokio::bufread::GzipDecoder;
use async_compression::tokio::write::GzipEncoder;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Gzip `data` in memory.
pub async fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzipEncoder::with_quality(
        Vec::with_capacity(data.len() / 2),
        async_compression::Level::Best,
    );
    encoder.write_all(data).await?;
    encoder.shutdown().await?;
    Ok(encoder.into_inner())
}

/// Inflate a gzip stream held in memory.
pub async fn gunzip(data: &[u8]) -> std::io::Result<Bytes> {
    let mut decoder = GzipDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 3);
    decoder.read_to_end(&mut out).await?;
    Ok(Bytes::from(out))
}

/// Gzip `data` if it is larger than `min_size` and compression pays off.
///
/// Returns `None` when the original bytes should be stored as-is.
pub async fn maybe_gzip(data: &[u8], min_size: u64) -> std::io::Result<Option<Vec<u8>>> {
    if (data.len() as u64) <= min_size {
        return Ok(None);
    }
    let compressed = gzip(data).await?;
    if compressed.len() < data.len() {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}

//! Raw binary stream phase: fixed-size chunk copies with byte-count checks.

use crate::error::{BlockError, Result};
use sha2::{Digest, Sha256};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Chunk size used for every stream copy.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Copy exactly `len` bytes from `reader` to `writer`, one chunk at a time.
///
/// Fails with [`BlockError::ShortStream`] if the reader ends early; the payload is never
/// buffered whole.
pub async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, len: u64) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE.min(len.max(1) as usize)];
    let mut copied = 0u64;

    while copied < len {
        let want = (len - copied).min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(BlockError::ShortStream {
                expected: len,
                actual: copied,
            });
        }

        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }

    Ok(copied)
}

/// Read and discard whatever is left of `reader`.
pub async fn drain<R>(reader: &mut R) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    Ok(tokio::io::copy(reader, &mut tokio::io::sink()).await?)
}

/// Reader adapter computing a SHA-256 digest of everything read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    /// Hex-encoded digest of the bytes read so far.
    pub fn hex_digest(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.hasher.update(&buf.filled()[before..]);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_copy_exact_spans_chunks() {
        let data: Vec<u8> = (0..(COPY_BUFFER_SIZE * 2 + 17)).map(|i| i as u8).collect();
        let mut out = Vec::new();

        let copied = copy_exact(&mut &data[..], &mut out, data.len() as u64)
            .await
            .unwrap();

        assert_eq!(copied, data.len() as u64);
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_copy_exact_stops_at_declared_length() {
        let data = b"0123456789".to_vec();
        let mut reader = &data[..];
        let mut out = Vec::new();

        copy_exact(&mut reader, &mut out, 4).await.unwrap();
        assert_eq!(out, b"0123");
        assert_eq!(reader, b"456789");
    }

    #[tokio::test]
    async fn test_copy_exact_short_source() {
        let data = b"abc".to_vec();
        let mut out = Vec::new();

        let err = copy_exact(&mut &data[..], &mut out, 10).await.unwrap_err();
        assert!(matches!(
            err,
            BlockError::ShortStream {
                expected: 10,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_hashing_reader_digest() {
        let mut reader = HashingReader::new(&b"hello world"[..]);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();

        assert_eq!(out, b"hello world");
        assert_eq!(
            reader.hex_digest(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}

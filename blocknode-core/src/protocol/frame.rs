use crate::error::{BlockError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length header preceding every envelope.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest envelope body accepted (64 MiB).
pub const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

/// Header followed by body: `[len: u64 BE][body]`.
pub fn encode_frame(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.put_u64(body.len() as u64);
    buf.extend_from_slice(body);
    buf.freeze()
}

pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if body.len() as u64 > MAX_FRAME_SIZE {
        return Err(BlockError::FrameTooLarge {
            size: body.len() as u64,
            max: MAX_FRAME_SIZE,
        });
    }

    writer.write_all(&encode_frame(body)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body. A peer closing before or inside a frame yields `ConnectionClosed`.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; FRAME_HEADER_SIZE];
    reader.read_exact(&mut header).await.map_err(eof_as_closed)?;

    let size = u64::from_be_bytes(header);
    if size > MAX_FRAME_SIZE {
        return Err(BlockError::FrameTooLarge {
            size,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; size as usize];
    reader.read_exact(&mut body).await.map_err(eof_as_closed)?;
    Ok(body)
}

fn eof_as_closed(e: std::io::Error) -> BlockError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        BlockError::ConnectionClosed
    } else {
        BlockError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_big_endian_length() {
        let frame = encode_frame(b"hello");
        assert_eq!(&frame[..8], &[0, 0, 0, 0, 0, 0, 0, 5]);
        assert_eq!(&frame[8..], b"hello");
    }

    #[tokio::test]
    async fn test_read_frame_from_mock() {
        let frame = encode_frame(b"{\"method\":\"hello\"}");
        let mut mock = tokio_test::io::Builder::new()
            .read(&frame[..3])
            .read(&frame[3..])
            .build();

        let body = read_frame(&mut mock).await.unwrap();
        assert_eq!(body, b"{\"method\":\"hello\"}");
    }

    #[tokio::test]
    async fn test_write_frame_to_mock() {
        let mut mock = tokio_test::io::Builder::new()
            .write(&encode_frame(b"abc"))
            .build();
        write_frame(&mut mock, b"abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let header = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut reader = &header[..];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, BlockError::FrameTooLarge { .. }));
        assert!(err.is_framing());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_closed_connection() {
        let frame = encode_frame(b"0123456789");
        let mut reader = &frame[..12];
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(matches!(err, BlockError::ConnectionClosed));

        let mut empty: &[u8] = &[];
        let err = read_frame(&mut empty).await.unwrap_err();
        assert!(matches!(err, BlockError::ConnectionClosed));
    }
}

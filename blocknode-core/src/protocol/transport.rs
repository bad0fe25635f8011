//! One request/response exchange over a byte stream.
//!
//! The structured envelope travels as a length-prefixed frame; an optional raw binary
//! stream of a length carried in the envelope sits directly after it, unframed.

use super::envelope::{RequestEnvelope, ResponseEnvelope};
use super::frame::{read_frame, write_frame};
use super::stream::{copy_exact, drain};
use crate::error::Result;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Take};

/// Byte streams a transport can run over (TCP sockets, in-memory duplex pipes).
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub struct Transport {
    stream: BufReader<Box<dyn AsyncStream>>,
    peer: Option<SocketAddr>,
}

impl Transport {
    pub fn new<S: AsyncStream + 'static>(stream: S) -> Self {
        Self {
            stream: BufReader::new(Box::new(stream)),
            peer: None,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub async fn read_request(&mut self) -> Result<RequestEnvelope> {
        let body = read_frame(&mut self.stream).await?;
        RequestEnvelope::from_bytes(&body)
    }

    pub async fn write_request(&mut self, request: &RequestEnvelope) -> Result<()> {
        write_frame(self.stream.get_mut(), &request.to_bytes()?).await
    }

    pub async fn read_response(&mut self) -> Result<ResponseEnvelope> {
        let body = read_frame(&mut self.stream).await?;
        ResponseEnvelope::from_bytes(&body)
    }

    pub async fn write_response(&mut self, response: &ResponseEnvelope) -> Result<()> {
        write_frame(self.stream.get_mut(), &response.to_bytes()?).await
    }

    /// Reader over the next `size` raw bytes following the envelope.
    ///
    /// Bytes already pulled into the read buffer are served first.
    pub fn binary_reader(&mut self, size: u64) -> Take<&mut BufReader<Box<dyn AsyncStream>>> {
        (&mut self.stream).take(size)
    }

    /// Writer for the raw stream following an outgoing envelope.
    pub fn writer(&mut self) -> &mut Box<dyn AsyncStream> {
        self.stream.get_mut()
    }

    /// Stream exactly `size` bytes from `source` to the peer.
    pub async fn send_binary<R>(&mut self, source: &mut R, size: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let sent = copy_exact(source, self.stream.get_mut(), size).await?;
        self.flush().await?;
        Ok(sent)
    }

    /// Receive exactly `size` bytes from the peer into `sink`.
    pub async fn read_binary<W>(&mut self, sink: &mut W, size: u64) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let received = copy_exact(&mut self.stream, sink, size).await?;
        sink.flush().await?;
        Ok(received)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.stream.get_mut().flush().await?;
        Ok(())
    }

    /// Half-close the write side.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.stream.get_mut().shutdown().await?;
        Ok(())
    }

    /// Read and drop input until the peer hangs up.
    pub async fn discard_remaining(&mut self) -> Result<u64> {
        drain(&mut self.stream).await
    }
}

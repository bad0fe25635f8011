use crate::error::{BlockError, Result};
use crate::protocol::{RequestEnvelope, ResponseEnvelope, Transport};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// State of one request as it moves through the middleware and handler pipeline.
pub struct RpcContext {
    transport: Transport,
    request: RequestEnvelope,
    responded: bool,
    started: Instant,
}

impl RpcContext {
    pub fn new(transport: Transport, request: RequestEnvelope) -> Self {
        Self {
            transport,
            request,
            responded: false,
            started: Instant::now(),
        }
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn request(&self) -> &RequestEnvelope {
        &self.request
    }

    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        self.request.params()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.transport.peer()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn has_responded(&self) -> bool {
        self.responded
    }

    /// Access to the raw stream for the binary phase of the exchange.
    pub fn transport(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Send a success envelope. Only one response is allowed per request.
    pub async fn respond<T: Serialize>(&mut self, result: &T) -> Result<()> {
        let response = ResponseEnvelope::ok(result)?;
        self.send(&response).await
    }

    pub async fn respond_error(&mut self, error: &BlockError) -> Result<()> {
        let response = ResponseEnvelope::error(error.to_string());
        self.send(&response).await
    }

    async fn send(&mut self, response: &ResponseEnvelope) -> Result<()> {
        if self.responded {
            return Err(BlockError::Internal(format!(
                "response to {} already sent",
                self.request.method
            )));
        }
        self.responded = true;
        self.transport.write_response(response).await
    }

    /// Half-close, then wait for the peer to hang up so unread input does not
    /// turn into a reset that discards the response.
    pub async fn close(mut self) -> Result<()> {
        self.transport.shutdown().await?;
        let discarded = self.transport.discard_remaining().await?;
        if discarded > 0 {
            tracing::debug!("Discarded {} unread bytes after {}", discarded, self.request.method);
        }
        Ok(())
    }
}

use crate::error::{BlockError, Result};
use crate::protocol::{
    Auth, Empty, HelloParams, ListParams, ListResult, LoadResult, Request, SaveParams, Transport,
};
use crate::registry::{BlockDescriptor, BlockKey};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Node client. Every call opens its own connection and carries exactly one request.
#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
    credentials: Option<(String, String)>,
}

impl Client {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            credentials: None,
        }
    }

    /// Sign every request as `ident` using `secret`.
    pub fn with_credentials(mut self, ident: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some((ident.into(), secret.into()));
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<Transport> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Transport::new(stream).with_peer(peer))
    }

    async fn send_request(&self, request: &Request) -> Result<Transport> {
        let mut envelope = request.to_envelope()?;
        if let Some((ident, secret)) = &self.credentials {
            envelope = envelope.with_auth(Auth::sign(ident, secret)?);
        }

        let mut transport = self.connect().await?;
        transport.write_request(&envelope).await?;
        Ok(transport)
    }

    async fn call<T: DeserializeOwned>(&self, request: &Request) -> Result<T> {
        let mut transport = self.send_request(request).await?;
        transport.read_response().await?.into_result()
    }

    pub async fn hello(&self, message: &str) -> Result<String> {
        let reply: HelloParams = self
            .call(&Request::Hello(HelloParams {
                message: message.to_string(),
            }))
            .await?;
        Ok(reply.message)
    }

    /// Upload `size` bytes from `source` as block `key`.
    pub async fn save<R>(&self, key: BlockKey, source: &mut R, size: u64) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut transport = self
            .send_request(&Request::Save(SaveParams { key, size }))
            .await?;

        if let Err(send_err) = transport.send_binary(source, size).await {
            // Half-close so the node sees the short stream and answers with its own error.
            let _ = transport.shutdown().await;
            return match transport.read_response().await {
                Ok(response) if !response.is_ok() => Err(BlockError::Remote(response.error)),
                _ => Err(send_err),
            };
        }

        transport.read_response().await?.into_result::<Empty>()?;
        Ok(())
    }

    /// Download block `key` into `sink`, returning its size.
    pub async fn load<W>(&self, key: BlockKey, sink: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut transport = self.send_request(&Request::Load(key)).await?;
        let result: LoadResult = transport.read_response().await?.into_result()?;
        transport.read_binary(sink, result.size).await
    }

    pub async fn delete(&self, key: BlockKey) -> Result<()> {
        self.call::<Empty>(&Request::Delete(key)).await?;
        Ok(())
    }

    pub async fn list(&self, cluster_id: u64) -> Result<Vec<BlockDescriptor>> {
        let result: ListResult = self
            .call(&Request::List(ListParams { cluster_id }))
            .await?;
        Ok(result.blocks)
    }
}

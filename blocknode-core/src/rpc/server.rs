use super::service::Service;
use crate::error::Result;
use crate::protocol::Transport;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::Instrument;

/// TCP listener that runs each accepted connection through a [`Service`] on its own task.
pub struct Server {
    service: Arc<Service>,
    shutdown: Arc<Notify>,
}

/// Cloneable trigger for a graceful stop of [`Server::serve`].
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// Stop accepting; `serve` returns once in-flight connections finish.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

impl Server {
    pub fn new(service: Service) -> Self {
        Self {
            service: Arc::new(service),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub async fn bind(addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr).await?;
        Ok(listener)
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Listening on {}", local_addr);

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    tracing::info!("Shutdown requested, no longer accepting on {}", local_addr);
                    break;
                }

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            tracing::debug!("set_nodelay failed for {}: {}", peer, e);
                        }
                        let service = Arc::clone(&self.service);
                        let span = tracing::info_span!("conn", %peer);
                        tasks.spawn(
                            async move { handle_connection(service, stream, peer).await }
                                .instrument(span),
                        );
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("Connection task panicked: {}", e);
                }
            }
        }

        drop(listener);
        let in_flight = tasks.len();
        if in_flight > 0 {
            tracing::info!("Waiting for {} in-flight connections", in_flight);
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Connection task panicked: {}", e);
            }
        }

        tracing::info!("Server on {} stopped", local_addr);
        Ok(())
    }
}

async fn handle_connection(service: Arc<Service>, stream: tokio::net::TcpStream, peer: SocketAddr) {
    let transport = Transport::new(stream).with_peer(peer);
    match service.serve_connection(transport).await {
        Ok(()) => {}
        Err(e) if e.is_framing() => tracing::debug!("Connection closed: {}", e),
        Err(e) => tracing::warn!("Request failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockError;
    use crate::protocol::{HelloParams, METHOD_HELLO, RequestEnvelope};
    use crate::rpc::{Handler, RpcContext};
    use async_trait::async_trait;
    use tokio::net::TcpStream;

    struct Slow;

    #[async_trait]
    impl Handler for Slow {
        async fn handle(&self, ctx: &mut RpcContext) -> crate::error::Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let params: HelloParams = ctx.params()?;
            ctx.respond(&params).await
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_in_flight_connection() {
        let server = Server::new(Service::builder().handler(METHOD_HELLO, Slow).build());
        let handle = server.handle();
        let listener = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = tokio::spawn(server.serve(listener));

        let mut client = Transport::new(TcpStream::connect(addr).await.unwrap());
        let request = RequestEnvelope::new(
            METHOD_HELLO,
            &HelloParams {
                message: "late".to_string(),
            },
        )
        .unwrap();
        client.write_request(&request).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();

        let echoed: HelloParams = client.read_response().await.unwrap().into_result().unwrap();
        assert_eq!(echoed.message, "late");
        drop(client);
        serving.await.unwrap().unwrap();

        let refused = TcpStream::connect(addr).await;
        assert!(refused.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_before_serve_returns() {
        let server = Server::new(Service::builder().build());
        server.handle().shutdown();
        let listener = Server::bind("127.0.0.1:0").await.unwrap();
        server.serve(listener).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_method_over_tcp() {
        let server = Server::new(Service::builder().build());
        let handle = server.handle();
        let listener = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = tokio::spawn(server.serve(listener));

        let mut client = Transport::new(TcpStream::connect(addr).await.unwrap());
        client
            .write_request(&RequestEnvelope::new("hello", &serde_json::json!({})).unwrap())
            .await
            .unwrap();
        let err = client
            .read_response()
            .await
            .unwrap()
            .into_result::<HelloParams>()
            .unwrap_err();
        assert!(matches!(err, BlockError::Remote(msg) if msg == "Unknown method: hello"));
        drop(client);

        handle.shutdown();
        serving.await.unwrap().unwrap();
    }
}

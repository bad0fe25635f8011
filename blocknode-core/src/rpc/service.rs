use super::context::RpcContext;
use crate::error::{BlockError, Result};
use crate::protocol::{Empty, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Serves one method. A handler may respond itself; if it returns `Ok` without
/// responding, an empty success envelope is sent for it.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut RpcContext) -> Result<()>;
}

/// Hook run around every handler.
///
/// `before` hooks run in registration order and may reject the request;
/// `after` hooks run in reverse order once the handler has succeeded.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn before(&self, _ctx: &mut RpcContext) -> Result<()> {
        Ok(())
    }

    async fn after(&self, _ctx: &mut RpcContext) -> Result<()> {
        Ok(())
    }
}

/// Built-in responder for methods with no registered handler.
struct NotFound;

#[async_trait]
impl Handler for NotFound {
    async fn handle(&self, ctx: &mut RpcContext) -> Result<()> {
        Err(BlockError::UnknownMethod(ctx.method().to_string()))
    }
}

#[derive(Default)]
pub struct ServiceBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(mut self, method: &str, handler: impl Handler + 'static) -> Self {
        self.handlers.insert(method.to_string(), Arc::new(handler));
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Service {
        Service {
            handlers: self.handlers,
            middleware: self.middleware,
            not_found: Arc::new(NotFound),
        }
    }
}

/// Method router plus middleware chain for one connection at a time.
pub struct Service {
    handlers: HashMap<String, Arc<dyn Handler>>,
    middleware: Vec<Arc<dyn Middleware>>,
    not_found: Arc<dyn Handler>,
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    fn route(&self, method: &str) -> Arc<dyn Handler> {
        self.handlers
            .get(method)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.not_found))
    }

    /// Run one request/response exchange and close the connection.
    ///
    /// Framing faults close without a reply. Any other failure is reported to the peer
    /// as an error envelope, unless a response has already gone out.
    pub async fn serve_connection(&self, mut transport: Transport) -> Result<()> {
        let request = transport.read_request().await?;
        let mut ctx = RpcContext::new(transport, request);

        let outcome = self.dispatch(&mut ctx).await;
        if let Err(e) = &outcome {
            if !e.is_framing() && !ctx.has_responded() {
                if let Err(send_err) = ctx.respond_error(e).await {
                    tracing::debug!("Failed to send error response: {}", send_err);
                }
            }
        }

        if let Err(e) = ctx.close().await {
            tracing::debug!("Connection shutdown failed: {}", e);
        }
        outcome
    }

    async fn dispatch(&self, ctx: &mut RpcContext) -> Result<()> {
        for middleware in &self.middleware {
            middleware.before(ctx).await?;
        }

        let handler = self.route(ctx.method());
        handler.handle(ctx).await?;
        if !ctx.has_responded() {
            ctx.respond(&Empty {}).await?;
        }

        for middleware in self.middleware.iter().rev() {
            if let Err(e) = middleware.after(ctx).await {
                tracing::warn!("Middleware {} failed after response: {}", middleware.name(), e);
                return Err(e);
            }
        }
        Ok(())
    }
}

use super::context::RpcContext;
use super::service::Middleware;
use crate::error::Result;
use crate::protocol::Credentials;
use async_trait::async_trait;

/// Logs each request on arrival and its latency once answered.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before(&self, ctx: &mut RpcContext) -> Result<()> {
        tracing::debug!(
            method = ctx.method(),
            peer = ?ctx.peer(),
            ident = ctx.request().auth.as_ref().map(|a| a.ident.as_str()),
            "request received"
        );
        Ok(())
    }

    async fn after(&self, ctx: &mut RpcContext) -> Result<()> {
        tracing::info!(
            method = ctx.method(),
            elapsed_ms = ctx.elapsed().as_millis() as u64,
            "request served"
        );
        Ok(())
    }
}

/// Rejects requests whose auth block does not verify against the credential table.
pub struct AuthMiddleware {
    credentials: Credentials,
}

impl AuthMiddleware {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl Middleware for AuthMiddleware {
    fn name(&self) -> &str {
        "auth"
    }

    async fn before(&self, ctx: &mut RpcContext) -> Result<()> {
        if let Err(e) = self.credentials.check(ctx.request().auth.as_ref()) {
            tracing::warn!("Rejected {} request from {:?}: {}", ctx.method(), ctx.peer(), e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockError;
    use crate::protocol::{Auth, HelloParams, METHOD_HELLO, RequestEnvelope, Transport};
    use tokio::io::duplex;

    fn context(auth: Option<Auth>) -> RpcContext {
        let (_, b) = duplex(64);
        let mut request = RequestEnvelope::new(
            METHOD_HELLO,
            &HelloParams {
                message: "hi".to_string(),
            },
        )
        .unwrap();
        request.auth = auth;
        RpcContext::new(Transport::new(b), request)
    }

    fn middleware() -> AuthMiddleware {
        let mut credentials = Credentials::default();
        credentials.insert("node-a", "topsecret");
        AuthMiddleware::new(credentials)
    }

    #[tokio::test]
    async fn test_auth_accepts_signed_request() {
        let auth = Auth::sign("node-a", "topsecret").unwrap();
        let mut ctx = context(Some(auth));
        middleware().before(&mut ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_rejects_wrong_secret_and_missing_auth() {
        let auth = Auth::sign("node-a", "wrong").unwrap();
        let mut ctx = context(Some(auth));
        let err = middleware().before(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BlockError::AuthFailed(_)));

        let mut ctx = context(None);
        assert!(middleware().before(&mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn test_logging_never_rejects() {
        let mut ctx = context(None);
        LoggingMiddleware.before(&mut ctx).await.unwrap();
        LoggingMiddleware.after(&mut ctx).await.unwrap();
    }
}

//! Connection pipeline: middleware, method routing, TCP listener and client.

mod client;
mod context;
mod middleware;
mod server;
mod service;

pub use client::Client;
pub use context::RpcContext;
pub use middleware::{AuthMiddleware, LoggingMiddleware};
pub use server::{Server, ServerHandle};
pub use service::{Handler, Middleware, Service, ServiceBuilder};

//! RPC surface of a storage node.

mod handlers;

pub use handlers::{DeleteHandler, HelloHandler, ListHandler, LoadHandler, SaveHandler};

use crate::protocol::{
    Credentials, METHOD_DELETE, METHOD_HELLO, METHOD_LIST, METHOD_LOAD, METHOD_SAVE,
};
use crate::rpc::{AuthMiddleware, LoggingMiddleware, Service};
use crate::storage::BlockStore;
use std::sync::Arc;

/// Wire the node's methods onto a service. Requests must be signed when
/// `credentials` is given.
pub fn build_service(store: Arc<BlockStore>, credentials: Option<Credentials>) -> Service {
    let mut builder = Service::builder().middleware(LoggingMiddleware);
    if let Some(credentials) = credentials {
        builder = builder.middleware(AuthMiddleware::new(credentials));
    }

    builder
        .handler(METHOD_HELLO, HelloHandler)
        .handler(METHOD_SAVE, SaveHandler::new(Arc::clone(&store)))
        .handler(METHOD_LOAD, LoadHandler::new(Arc::clone(&store)))
        .handler(METHOD_DELETE, DeleteHandler::new(Arc::clone(&store)))
        .handler(METHOD_LIST, ListHandler::new(store))
        .build()
}

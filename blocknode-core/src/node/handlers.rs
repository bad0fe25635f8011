use crate::error::Result;
use crate::protocol::{
    Empty, HelloParams, ListParams, ListResult, LoadResult, SaveParams, drain,
};
use crate::registry::{BlockKey, KeyPrefix};
use crate::rpc::{Handler, RpcContext};
use crate::storage::BlockStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Liveness check; echoes the message back.
pub struct HelloHandler;

#[async_trait]
impl Handler for HelloHandler {
    async fn handle(&self, ctx: &mut RpcContext) -> Result<()> {
        let params: HelloParams = ctx.params()?;
        ctx.respond(&params).await
    }
}

pub struct SaveHandler {
    store: Arc<BlockStore>,
}

impl SaveHandler {
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for SaveHandler {
    async fn handle(&self, ctx: &mut RpcContext) -> Result<()> {
        let params: SaveParams = ctx.params()?;

        let mut body = ctx.transport().binary_reader(params.size);
        let saved = self.store.save_block(&params.key, &mut body, params.size).await;
        if saved.is_err() {
            // consume the rest of the upload so the error reply is not lost to a reset
            if let Err(e) = drain(&mut body).await {
                tracing::debug!("Failed to drain upload for {}: {}", params.key, e);
            }
        }

        saved?;
        ctx.respond(&Empty {}).await
    }
}

/// Sends `{size}` and then streams the block's bytes right after the envelope.
pub struct LoadHandler {
    store: Arc<BlockStore>,
}

impl LoadHandler {
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for LoadHandler {
    async fn handle(&self, ctx: &mut RpcContext) -> Result<()> {
        let key: BlockKey = ctx.params()?;
        let descriptor = self.store.lookup(&key)?;

        ctx.respond(&LoadResult {
            size: descriptor.data_size,
        })
        .await?;
        self.store
            .stream_block(&descriptor, ctx.transport().writer())
            .await?;
        Ok(())
    }
}

pub struct DeleteHandler {
    store: Arc<BlockStore>,
}

impl DeleteHandler {
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for DeleteHandler {
    async fn handle(&self, ctx: &mut RpcContext) -> Result<()> {
        let key: BlockKey = ctx.params()?;
        self.store.delete_block(&key).await?;
        ctx.respond(&Empty {}).await
    }
}

pub struct ListHandler {
    store: Arc<BlockStore>,
}

impl ListHandler {
    pub fn new(store: Arc<BlockStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for ListHandler {
    async fn handle(&self, ctx: &mut RpcContext) -> Result<()> {
        let params: ListParams = ctx.params()?;
        let blocks = self.store.list_blocks(&KeyPrefix::cluster(params.cluster_id))?;
        ctx.respond(&ListResult { blocks }).await
    }
}

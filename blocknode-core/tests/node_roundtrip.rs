use blocknode_core::{
    BlockError, BlockKey, BlockStore, BlockStoreConfig, Client, Credentials, IdAllocator,
    MemKvStore, MetadataRegistry, Server, ServerHandle, SqlRegistry, build_service,
};
use rand::RngCore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

struct TestNode {
    addr: SocketAddr,
    handle: ServerHandle,
    serving: JoinHandle<blocknode_core::Result<()>>,
    store: Arc<BlockStore>,
    _dir: tempfile::TempDir,
}

impl TestNode {
    async fn start(credentials: Option<Credentials>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry: Arc<dyn MetadataRegistry> =
            Arc::new(SqlRegistry::new(dir.path().join("meta.db")).unwrap());
        let allocator = Arc::new(IdAllocator::load(Arc::new(MemKvStore::new()), "store").unwrap());
        let store = Arc::new(
            BlockStore::new(
                BlockStoreConfig {
                    data_dir: dir.path().join("data"),
                    batch_size: 4,
                    block_size: 64 * 1024,
                    node_id: Some("test-node".to_string()),
                },
                registry,
                allocator,
            )
            .unwrap(),
        );

        let server = Server::new(build_service(Arc::clone(&store), credentials));
        let handle = server.handle();
        let listener = Server::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = tokio::spawn(server.serve(listener));

        Self {
            addr,
            handle,
            serving,
            store,
            _dir: dir,
        }
    }

    fn client(&self) -> Client {
        Client::new(self.addr.to_string())
    }

    async fn stop(self) {
        self.handle.shutdown();
        self.serving.await.unwrap().unwrap();
    }
}

fn random_payload(len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut payload);
    payload
}

#[tokio::test]
async fn test_save_load_delete_list() {
    let node = TestNode::start(None).await;
    let client = node.client();
    let key = BlockKey::new(1, 2, 3, 4);
    let payload = random_payload(1024 * 1024);

    assert_eq!(client.hello("ping").await.unwrap(), "ping");

    client
        .save(key, &mut &payload[..], payload.len() as u64)
        .await
        .unwrap();
    assert!(node.store.block_exists(&key).unwrap());

    let mut loaded = Vec::new();
    let size = client.load(key, &mut loaded).await.unwrap();
    assert_eq!(size, payload.len() as u64);
    assert!(loaded == payload);

    let listed = client.list(1).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].key, key);
    assert_eq!(listed[0].data_size, payload.len() as u64);
    assert_eq!(listed[0].batch_count, 4);

    client.delete(key).await.unwrap();
    assert!(client.list(1).await.unwrap().is_empty());

    let err = client.load(key, &mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, BlockError::Remote(msg) if msg.starts_with("Not found")));

    node.stop().await;
}

#[tokio::test]
async fn test_duplicate_save_is_rejected_with_error() {
    let node = TestNode::start(None).await;
    let client = node.client();
    let key = BlockKey::new(1, 1, 1, 1);
    let payload = random_payload(300 * 1024);

    client
        .save(key, &mut &payload[..], payload.len() as u64)
        .await
        .unwrap();
    let err = client
        .save(key, &mut &payload[..], payload.len() as u64)
        .await
        .unwrap_err();
    assert!(matches!(err, BlockError::Remote(msg) if msg.starts_with("Already exists")));

    // the original block is untouched
    let mut loaded = Vec::new();
    client.load(key, &mut loaded).await.unwrap();
    assert!(loaded == payload);

    node.stop().await;
}

#[tokio::test]
async fn test_list_is_scoped_by_cluster() {
    let node = TestNode::start(None).await;
    let client = node.client();

    for key in [
        BlockKey::new(1, 1, 0, 1),
        BlockKey::new(1, 1, 0, 0),
        BlockKey::new(2, 1, 0, 0),
    ] {
        client.save(key, &mut &b"data"[..], 4).await.unwrap();
    }

    let keys: Vec<BlockKey> = client
        .list(1)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.key)
        .collect();
    assert_eq!(keys, vec![BlockKey::new(1, 1, 0, 0), BlockKey::new(1, 1, 0, 1)]);
    assert_eq!(client.list(2).await.unwrap().len(), 1);
    assert!(client.list(3).await.unwrap().is_empty());

    node.stop().await;
}

#[tokio::test]
async fn test_auth_wrong_secret_gets_structured_error() {
    let mut credentials = Credentials::default();
    credentials.insert("alice", "s3cret");
    let node = TestNode::start(Some(credentials)).await;

    let good = node.client().with_credentials("alice", "s3cret");
    assert_eq!(good.hello("hi").await.unwrap(), "hi");

    let bad = node.client().with_credentials("alice", "wrong");
    let err = bad.hello("hi").await.unwrap_err();
    assert!(matches!(err, BlockError::Remote(msg) if msg.starts_with("Authentication failed")));

    let anonymous = node.client();
    let err = anonymous.hello("hi").await.unwrap_err();
    assert!(matches!(err, BlockError::Remote(_)));

    // a rejected upload must not leave anything behind
    let key = BlockKey::new(9, 9, 9, 9);
    let err = bad.save(key, &mut &b"payload"[..], 7).await.unwrap_err();
    assert!(matches!(err, BlockError::Remote(_)));
    assert!(!node.store.block_exists(&key).unwrap());

    node.stop().await;
}

#[tokio::test]
async fn test_short_upload_leaves_no_block() {
    let node = TestNode::start(None).await;
    let client = node.client();
    let key = BlockKey::new(5, 5, 5, 5);

    // declares 1000 bytes but only has 10
    let err = client
        .save(key, &mut &[7u8; 10][..], 1000)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BlockError::Remote(_) | BlockError::ShortStream { .. }
    ));
    assert!(!node.store.block_exists(&key).unwrap());

    node.stop().await;
}

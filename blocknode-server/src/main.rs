mod config;

use anyhow::Context;
use blocknode_core::{
    BlockKey, BlockStore, Client, IdAllocator, KvRegistry, MetadataRegistry, Server,
    SqlRegistry, SqliteKvStore, build_service,
};
use clap::{Args, Parser, Subcommand};
use config::{Config, RegistryBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "blocknode")]
#[command(about = "Storage node for a chunked block store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Server {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Check that a node answers
    Hello {
        #[command(flatten)]
        remote: RemoteArgs,
        #[arg(default_value = "hello")]
        message: String,
    },
    /// Upload a local file as one block
    Put {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        key: KeyArgs,
        /// File to upload
        input: PathBuf,
    },
    /// Download a block into a local file
    Get {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        key: KeyArgs,
        /// Destination file
        output: PathBuf,
    },
    /// Delete a block
    Delete {
        #[command(flatten)]
        remote: RemoteArgs,
        #[command(flatten)]
        key: KeyArgs,
    },
    /// List the blocks of a cluster as JSON
    List {
        #[command(flatten)]
        remote: RemoteArgs,
        #[arg(long)]
        cluster_id: u64,
    },
}

#[derive(Args)]
struct RemoteArgs {
    /// Node address
    #[arg(short, long, default_value = "127.0.0.1:7070")]
    addr: String,
    /// Identity to sign requests with
    #[arg(long, requires = "secret")]
    ident: Option<String>,
    #[arg(long, requires = "ident")]
    secret: Option<String>,
}

impl RemoteArgs {
    fn client(&self) -> Client {
        let client = Client::new(self.addr.clone());
        match (&self.ident, &self.secret) {
            (Some(ident), Some(secret)) => client.with_credentials(ident, secret),
            _ => client,
        }
    }
}

#[derive(Args)]
struct KeyArgs {
    #[arg(long)]
    cluster_id: u64,
    #[arg(long)]
    file_id: u64,
    #[arg(long)]
    batch_id: u64,
    #[arg(long)]
    block_id: u64,
}

impl KeyArgs {
    fn key(&self) -> BlockKey {
        BlockKey::new(self.cluster_id, self.file_id, self.batch_id, self.block_id)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { config } => {
            let cfg = match Config::from_file(&config) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Failed to load config {}: {}", config, e);
                    std::process::exit(1);
                }
            };

            let _guard = init_tracing(cfg.log_dir.as_deref());
            tracing::info!("Starting Blocknode server with config: {}", config);
            tracing::info!(
                "Node ID: {}, Bind: {}, Batch size: {}, Block size: {}",
                cfg.node.node_id,
                cfg.node.bind_addr,
                cfg.storage.batch_size,
                cfg.storage.block_size
            );

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {:#}", e);
                std::process::exit(1);
            }
        }
        command => {
            let _guard = init_tracing(None);
            if let Err(e) = run_client(command).await {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Console logging, plus a file under `log_dir` when configured. The returned guard
/// flushes the file writer on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "blocknode.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blocknode=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

async fn run_server(cfg: Config) -> anyhow::Result<()> {
    cfg.ensure_dirs().context("failed to create node directories")?;
    let pid_path = cfg.pid_path();
    if let Some(path) = &pid_path {
        std::fs::write(path, std::process::id().to_string())
            .with_context(|| format!("failed to write pid file {}", path.display()))?;
    }

    let registry: Arc<dyn MetadataRegistry> = match cfg.registry.backend {
        RegistryBackend::Sql => Arc::new(SqlRegistry::new(&cfg.registry.path)?),
        RegistryBackend::Kv => Arc::new(KvRegistry::new(Arc::new(SqliteKvStore::new(
            &cfg.registry.path,
        )?))),
    };
    tracing::info!(
        "Using {:?} registry at {}",
        cfg.registry.backend,
        cfg.registry.path.display()
    );

    let allocator_store = Arc::new(SqliteKvStore::new(cfg.allocator_path())?);
    let allocator = Arc::new(IdAllocator::load(allocator_store, "store")?);
    let store = Arc::new(BlockStore::new(cfg.block_store_config(), registry, allocator)?);

    let credentials = cfg.credentials();
    if credentials.is_none() {
        tracing::warn!("Authentication is disabled; every request is accepted");
    }

    let server = Server::new(build_service(store, credentials));
    let handle = server.handle();
    let listener = Server::bind(&cfg.node.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.node.bind_addr))?;

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received ctrl-c, draining connections"),
            Err(e) => tracing::error!("Failed to listen for ctrl-c: {}", e),
        }
        handle.shutdown();
    });

    let served = server.serve(listener).await;

    if let Some(path) = &pid_path {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove pid file {}: {}", path.display(), e);
        }
    }

    served?;
    Ok(())
}

async fn run_client(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Server { .. } => anyhow::bail!("server is not a client command"),
        Commands::Hello { remote, message } => {
            let reply = remote.client().hello(&message).await?;
            println!("{}", reply);
        }
        Commands::Put { remote, key, input } => {
            let mut file = tokio::fs::File::open(&input)
                .await
                .with_context(|| format!("failed to open {}", input.display()))?;
            let size = file.metadata().await?.len();
            remote.client().save(key.key(), &mut file, size).await?;
            println!("Saved {} ({} bytes)", key.key(), size);
        }
        Commands::Get { remote, key, output } => {
            let mut file = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("failed to create {}", output.display()))?;
            let size = remote.client().load(key.key(), &mut file).await?;
            file.sync_all().await?;
            println!("Loaded {} ({} bytes) into {}", key.key(), size, output.display());
        }
        Commands::Delete { remote, key } => {
            remote.client().delete(key.key()).await?;
            println!("Deleted {}", key.key());
        }
        Commands::List { remote, cluster_id } => {
            let blocks = remote.client().list(cluster_id).await?;
            println!("{}", serde_json::to_string_pretty(&blocks)?);
        }
    }
    Ok(())
}

use blocknode_core::{BlockError, BlockStoreConfig, Credentials, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// The pid file is written here when set.
    #[serde(default)]
    pub run_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub bind_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Segments per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Capacity of one segment in bytes.
    #[serde(default = "default_block_size")]
    pub block_size: u64,
}

fn default_batch_size() -> usize {
    16
}

fn default_block_size() -> u64 {
    1024 * 1024
}

/// Registry backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub backend: RegistryBackend,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackend {
    Sql,
    Kv,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("BLOCKNODE").separator("__"))
            .build()
            .map_err(|e| BlockError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| BlockError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node.bind_addr.trim().is_empty() {
            return Err(BlockError::Config("node.bind_addr must not be empty".to_string()));
        }
        if self.storage.batch_size == 0 {
            return Err(BlockError::Config("storage.batch_size must be at least 1".to_string()));
        }
        if self.storage.block_size == 0 {
            return Err(BlockError::Config("storage.block_size must be at least 1".to_string()));
        }
        if self.auth.enabled && self.auth.credentials.is_empty() {
            return Err(BlockError::Config(
                "auth is enabled but no credentials are configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Create every directory the node writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage.data_dir)?;
        if let Some(parent) = self.registry.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        for dir in [&self.log_dir, &self.run_dir].into_iter().flatten() {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn block_store_config(&self) -> BlockStoreConfig {
        BlockStoreConfig {
            data_dir: self.storage.data_dir.clone(),
            batch_size: self.storage.batch_size,
            block_size: self.storage.block_size,
            node_id: Some(self.node.node_id.clone()),
        }
    }

    /// Persistent state of the storage id allocator.
    pub fn allocator_path(&self) -> PathBuf {
        self.storage.data_dir.join("alloc.db")
    }

    pub fn pid_path(&self) -> Option<PathBuf> {
        self.run_dir.as_ref().map(|dir| dir.join("blocknode.pid"))
    }

    pub fn credentials(&self) -> Option<Credentials> {
        if !self.auth.enabled {
            return None;
        }
        Some(Credentials::new(self.auth.credentials.clone()))
    }
}

//! Node configuration.
//!
//! Loaded from a TOML file (every section optional) with CLI overrides applied
//! on top. Missing values fall back to the defaults below.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::storage::kvstore::{self, KvStoreConfig};
use crate::storage::{EngineConfigMap, EngineRegistry, StorageError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP bind address; also the member identity (`host:port`).
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// Members contacted on startup.
    #[serde(default)]
    pub seeds: Vec<SocketAddr>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub replication: ReplicationConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub eviction: EvictionConfig,

    #[serde(default)]
    pub lock: LockConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Fixed for the lifetime of a cluster.
    #[serde(default = "default_partition_count")]
    pub partition_count: u32,

    /// Copies per partition, primary included.
    #[serde(default = "default_replica_count")]
    pub replica_count: usize,

    /// Ring points per member.
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            partition_count: default_partition_count(),
            replica_count: default_replica_count(),
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationMode {
    /// Wait for backups before acknowledging a write.
    #[default]
    Sync,
    /// Acknowledge after the local write; ship to backups in the background.
    Async,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default)]
    pub mode: ReplicationMode,

    /// Acknowledged copies required in sync mode, counting the primary.
    #[serde(default = "default_write_quorum")]
    pub write_quorum: usize,

    /// Per-backup request timeout.
    #[serde(default = "default_replication_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::default(),
            write_quorum: default_write_quorum(),
            timeout_ms: default_replication_timeout_ms(),
        }
    }
}

impl ReplicationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Registered engine name; empty selects the built-in engine.
    #[serde(default)]
    pub name: String,

    /// Passed verbatim to the engine constructor.
    #[serde(default)]
    pub config: EngineConfigMap,
}

impl EngineConfig {
    /// Fills in the default engine and its default settings, then checks that the
    /// named engine is registered.
    pub fn sanitize(&mut self, registry: &EngineRegistry) -> Result<(), StorageError> {
        if self.name.is_empty() {
            self.name = kvstore::ENGINE_NAME.to_string();
        }
        if self.config.is_empty() && self.name == kvstore::ENGINE_NAME {
            self.config = KvStoreConfig::default().to_map();
        }
        if !registry.has_engine(&self.name) {
            return Err(StorageError::UnknownEngine(self.name.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(default = "default_eviction_interval_ms")]
    pub interval_ms: u64,

    /// Keys inspected per fragment on each pass.
    #[serde(default = "default_max_keys_per_sweep")]
    pub max_keys_per_sweep: usize,

    /// How long backups remember a replicated removal.
    #[serde(default = "default_tombstone_ttl_ms")]
    pub tombstone_ttl_ms: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_eviction_interval_ms(),
            max_keys_per_sweep: default_max_keys_per_sweep(),
            tombstone_ttl_ms: default_tombstone_ttl_ms(),
        }
    }
}

impl EvictionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl LockConfig {
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind: Option<SocketAddr>,
    pub seeds: Vec<SocketAddr>,
    pub log_level: Option<String>,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3320))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_partition_count() -> u32 {
    271
}

fn default_replica_count() -> usize {
    1
}

fn default_virtual_nodes() -> usize {
    64
}

fn default_write_quorum() -> usize {
    1
}

fn default_replication_timeout_ms() -> u64 {
    1000
}

fn default_eviction_interval_ms() -> u64 {
    100
}

fn default_max_keys_per_sweep() -> usize {
    20
}

fn default_tombstone_ttl_ms() -> u64 {
    60_000
}

fn default_retry_initial_ms() -> u64 {
    5
}

fn default_retry_max_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            seeds: Vec::new(),
            log_level: default_log_level(),
            routing: RoutingConfig::default(),
            replication: ReplicationConfig::default(),
            engine: EngineConfig::default(),
            eviction: EvictionConfig::default(),
            lock: LockConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(bind) = overrides.bind {
            self.bind = bind;
        }
        if !overrides.seeds.is_empty() {
            self.seeds = overrides.seeds.clone();
        }
        if let Some(ref log_level) = overrides.log_level {
            self.log_level = log_level.clone();
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_routing()?;
        self.validate_replication()?;
        self.validate_timers()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            anyhow::bail!(
                "log_level must be one of {:?}, got: {}",
                valid_levels,
                self.log_level
            );
        }
        Ok(())
    }

    fn validate_routing(&self) -> Result<()> {
        if self.routing.partition_count == 0 {
            anyhow::bail!("routing.partition_count must be > 0");
        }
        if self.routing.replica_count == 0 {
            anyhow::bail!("routing.replica_count must be > 0");
        }
        if self.routing.virtual_nodes == 0 {
            anyhow::bail!("routing.virtual_nodes must be > 0");
        }
        Ok(())
    }

    fn validate_replication(&self) -> Result<()> {
        let quorum = self.replication.write_quorum;
        if quorum == 0 || quorum > self.routing.replica_count {
            anyhow::bail!(
                "replication.write_quorum ({}) must be between 1 and routing.replica_count ({})",
                quorum,
                self.routing.replica_count
            );
        }
        if self.replication.timeout_ms == 0 {
            anyhow::bail!("replication.timeout_ms must be > 0");
        }
        Ok(())
    }

    fn validate_timers(&self) -> Result<()> {
        if self.eviction.interval_ms == 0 {
            anyhow::bail!("eviction.interval_ms must be > 0");
        }
        if self.eviction.max_keys_per_sweep == 0 {
            anyhow::bail!("eviction.max_keys_per_sweep must be > 0");
        }
        if self.eviction.tombstone_ttl_ms == 0 {
            anyhow::bail!("eviction.tombstone_ttl_ms must be > 0");
        }
        if self.lock.retry_initial_ms == 0 || self.lock.retry_initial_ms > self.lock.retry_max_ms {
            anyhow::bail!(
                "lock.retry_initial_ms ({}) must be > 0 and <= lock.retry_max_ms ({})",
                self.lock.retry_initial_ms,
                self.lock.retry_max_ms
            );
        }
        Ok(())
    }
}

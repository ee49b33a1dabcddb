//! Storage Engine Registry
//!
//! Maps engine names (e.g. "kvstore") to constructors. Engines are chosen by name
//! from configuration at startup; each DMap partition gets its own instance.

use dashmap::DashMap;
use std::sync::Arc;

use super::engine::{EngineConfigMap, StorageEngine, StorageError};
use super::kvstore::{self, KvStore, KvStoreConfig};
use crate::config::EngineConfig;

/// Constructor for one engine instance from its configuration map.
pub type EngineFactory =
    Arc<dyn Fn(&EngineConfigMap) -> Result<Box<dyn StorageEngine>, StorageError> + Send + Sync>;

pub struct EngineRegistry {
    factories: DashMap<String, EngineFactory>,
}

impl EngineRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registry with the built-in engine already registered.
    pub fn with_defaults() -> Arc<Self> {
        let registry = Self::new();
        registry.register(kvstore::ENGINE_NAME, |config| {
            let config = KvStoreConfig::from_map(config)?;
            Ok(Box::new(KvStore::new(&config)) as Box<dyn StorageEngine>)
        });
        registry
    }

    /// Registers a constructor under `engine_name`, replacing any previous one.
    pub fn register<F>(&self, engine_name: &str, factory: F)
    where
        F: Fn(&EngineConfigMap) -> Result<Box<dyn StorageEngine>, StorageError>
            + Send
            + Sync
            + 'static,
    {
        self.factories
            .insert(engine_name.to_string(), Arc::new(factory));

        tracing::info!("Registered storage engine: {}", engine_name);
    }

    pub fn create(&self, config: &EngineConfig) -> Result<Box<dyn StorageEngine>, StorageError> {
        let factory = self
            .factories
            .get(&config.name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::UnknownEngine(config.name.clone()))?;
        factory(&config.config)
    }

    pub fn list_engines(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_engine(&self, engine_name: &str) -> bool {
        self.factories.contains_key(engine_name)
    }

    pub fn engine_count(&self) -> usize {
        self.factories.len()
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }
}

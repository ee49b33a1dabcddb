//! Built-in in-memory engine.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::engine::{EngineConfigMap, EngineStats, StorageEngine, StorageError};

pub const ENGINE_NAME: &str = "kvstore";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KvStoreConfig {
    /// Initial number of slots reserved per partition.
    pub table_size: usize,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self { table_size: 1024 }
    }
}

impl KvStoreConfig {
    pub fn from_map(map: &EngineConfigMap) -> Result<Self, StorageError> {
        serde_json::from_value(serde_json::Value::Object(map.clone()))
            .map_err(|e| StorageError::InvalidConfig(format!("{}: {}", ENGINE_NAME, e)))
    }

    pub fn to_map(&self) -> EngineConfigMap {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => EngineConfigMap::new(),
        }
    }
}

pub struct KvStore {
    data: DashMap<String, Vec<u8>>,
    allocated: AtomicUsize,
}

impl KvStore {
    pub fn new(config: &KvStoreConfig) -> Self {
        Self {
            data: DashMap::with_capacity(config.table_size),
            allocated: AtomicUsize::new(0),
        }
    }
}

impl StorageEngine for KvStore {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let added = key.len() + value.len();
        match self.data.insert(key.to_string(), value) {
            Some(previous) => {
                self.allocated.fetch_add(added, Ordering::Relaxed);
                self.allocated
                    .fetch_sub(key.len() + previous.len(), Ordering::Relaxed);
            }
            None => {
                self.allocated.fetch_add(added, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.get(key).map(|value| value.clone()))
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        match self.data.remove(key) {
            Some((key, value)) => {
                self.allocated
                    .fetch_sub(key.len() + value.len(), Ordering::Relaxed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.data.iter().map(|entry| entry.key().clone()).collect())
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            length: self.data.len(),
            allocated: self.allocated.load(Ordering::Relaxed),
        }
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Free-form engine configuration, as supplied in the `[engine.config]` table.
pub type EngineConfigMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("unknown storage engine: {0}")]
    UnknownEngine(String),

    #[error("invalid storage engine config: {0}")]
    InvalidConfig(String),

    #[error("storage engine failure: {0}")]
    Engine(String),
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of stored keys.
    pub length: usize,
    /// Bytes held by keys and values.
    pub allocated: usize,
}

/// Byte-level store for the entries of one partition of one DMap.
///
/// The entry engine serializes access per key, so implementations only need to
/// be safe for concurrent calls on *different* keys. Values are opaque.
pub trait StorageEngine: Send + Sync {
    fn name(&self) -> &str;

    fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Returns `true` if a value was removed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Scans the key set.
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> EngineStats;
}

//! Storage Module Tests
//!
//! ## Test Scopes
//! - **KvStore**: byte-level put/get/delete/scan and accounting.
//! - **EngineRegistry**: lookup by name, custom engines, config handling.

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::storage::kvstore::{KvStore, KvStoreConfig};
    use crate::storage::{EngineConfigMap, EngineRegistry, StorageEngine, StorageError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn kvstore() -> KvStore {
        KvStore::new(&KvStoreConfig::default())
    }

    // ============================================================
    // KVSTORE TESTS
    // ============================================================

    #[test]
    fn test_put_and_get() {
        let store = kvstore();

        store.put("book_1", b"dune".to_vec()).unwrap();

        assert_eq!(store.get("book_1").unwrap(), Some(b"dune".to_vec()));
        assert_eq!(store.get("book_2").unwrap(), None);
        assert_eq!(store.name(), "kvstore");
    }

    #[test]
    fn test_overwrite_keeps_single_key() {
        let store = kvstore();

        store.put("k", b"first".to_vec()).unwrap();
        store.put("k", b"second".to_vec()).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k").unwrap(), Some(b"second".to_vec()));
        assert_eq!(store.stats().allocated, "k".len() + "second".len());
    }

    #[test]
    fn test_delete_reports_presence() {
        let store = kvstore();
        store.put("k", b"v".to_vec()).unwrap();

        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert!(store.is_empty());
        assert_eq!(store.stats().allocated, 0);
    }

    #[test]
    fn test_keys_scans_everything() {
        let store = kvstore();
        for i in 0..10 {
            store.put(&format!("key_{}", i), vec![i as u8]).unwrap();
        }

        let mut keys = store.keys().unwrap();
        keys.sort();

        assert_eq!(keys.len(), 10);
        assert_eq!(keys[0], "key_0");
        assert_eq!(store.stats().length, 10);
    }

    #[test]
    fn test_kvstore_config_round_trips_through_map() {
        let config = KvStoreConfig { table_size: 42 };
        let map = config.to_map();

        assert_eq!(KvStoreConfig::from_map(&map).unwrap(), config);
        assert_eq!(
            KvStoreConfig::from_map(&EngineConfigMap::new()).unwrap(),
            KvStoreConfig::default()
        );
    }

    #[test]
    fn test_kvstore_config_rejects_bad_types() {
        let mut map = EngineConfigMap::new();
        map.insert("table_size".to_string(), serde_json::json!("huge"));

        assert!(matches!(
            KvStoreConfig::from_map(&map),
            Err(StorageError::InvalidConfig(_))
        ));
    }

    // ============================================================
    // REGISTRY TESTS
    // ============================================================

    #[test]
    fn test_defaults_register_kvstore() {
        let registry = EngineRegistry::with_defaults();

        assert!(registry.has_engine("kvstore"));
        assert_eq!(registry.engine_count(), 1);
        assert_eq!(registry.list_engines(), vec!["kvstore".to_string()]);
    }

    #[test]
    fn test_create_returns_fresh_instances() {
        let registry = EngineRegistry::with_defaults();
        let config = EngineConfig {
            name: "kvstore".to_string(),
            config: EngineConfigMap::new(),
        };

        let a = registry.create(&config).unwrap();
        let b = registry.create(&config).unwrap();
        a.put("k", b"v".to_vec()).unwrap();

        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
    }

    #[test]
    fn test_create_unknown_engine() {
        let registry = EngineRegistry::new();
        let config = EngineConfig {
            name: "missing".to_string(),
            config: EngineConfigMap::new(),
        };

        assert!(matches!(
            registry.create(&config),
            Err(StorageError::UnknownEngine(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_custom_engine_receives_config() {
        // ARRANGE
        let registry = EngineRegistry::with_defaults();
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();

        registry.register("sized", move |config| {
            counter.fetch_add(1, Ordering::SeqCst);
            let table_size = config
                .get("table_size")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| StorageError::InvalidConfig("table_size required".into()))?;
            Ok(Box::new(KvStore::new(&KvStoreConfig {
                table_size: table_size as usize,
            })) as Box<dyn StorageEngine>)
        });

        let mut map = EngineConfigMap::new();
        map.insert("table_size".to_string(), serde_json::json!(8));

        // ACT
        let engine = registry
            .create(&EngineConfig {
                name: "sized".to_string(),
                config: map,
            })
            .unwrap();
        let failed = registry.create(&EngineConfig {
            name: "sized".to_string(),
            config: EngineConfigMap::new(),
        });

        // ASSERT
        assert_eq!(engine.name(), "kvstore");
        assert!(matches!(failed, Err(StorageError::InvalidConfig(_))));
        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(registry.engine_count(), 2);
    }
}

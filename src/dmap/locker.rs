use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key critical sections for one fragment.
///
/// Mutexes are created on demand and dropped from the table once nobody holds
/// or waits for them.
#[derive(Clone, Default)]
pub struct KeyLocker {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`. Cancel-safe: dropping the future
    /// before it resolves leaves nothing held.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;

        KeyGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Keys with a live mutex.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key. Owned, so it can move into a spawned task.
pub struct KeyGuard {
    key: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the table's own reference left: nobody holds or waits.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

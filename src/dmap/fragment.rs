use dashmap::DashMap;
use std::sync::Arc;

use super::locker::{KeyGuard, KeyLocker};
use super::types::Entry;
use crate::error::DMapError;
use crate::routing::PartitionId;
use crate::stats::Counters;
use crate::storage::{EngineStats, StorageEngine};

/// Version of a replicated removal, kept so that an older upsert arriving late
/// cannot bring the key back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tombstone {
    version: i64,
    buried_at: u64,
}

/// The entries of one DMap that fall into one partition, on this member.
///
/// Every method below assumes the caller holds the key's [`KeyGuard`].
pub struct Fragment {
    partition: PartitionId,
    engine: Box<dyn StorageEngine>,
    locker: KeyLocker,
    tombstones: DashMap<String, Tombstone>,
    counters: Arc<Counters>,
}

impl Fragment {
    pub fn new(
        partition: PartitionId,
        engine: Box<dyn StorageEngine>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            partition,
            engine,
            locker: KeyLocker::new(),
            tombstones: DashMap::new(),
            counters,
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.locker.lock(key).await
    }

    /// Stored entry, expired or not.
    pub fn load(&self, key: &str) -> Result<Option<Entry>, DMapError> {
        match self.engine.get(key)? {
            Some(raw) => Entry::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Stored entry if it is still live at `now`. An expired one is deleted on the spot.
    pub fn load_live(&self, key: &str, now: u64) -> Result<Option<Entry>, DMapError> {
        match self.load(key)? {
            Some(entry) if entry.is_expired_at(now) => {
                self.evict(key)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub fn store(&self, entry: &Entry) -> Result<(), DMapError> {
        self.engine.put(&entry.key, entry.encode()?)?;
        self.tombstones
            .remove_if(&entry.key, |_, tombstone| tombstone.version <= entry.version);
        Ok(())
    }

    /// Version of the last replicated removal of `key`, if still remembered.
    pub fn tombstone(&self, key: &str) -> Option<i64> {
        self.tombstones.get(key).map(|tombstone| tombstone.version)
    }

    /// Removes `key` and remembers the removal at `version`.
    pub fn bury(&self, key: &str, version: i64, now: u64) -> Result<bool, DMapError> {
        let removed = self.engine.delete(key)?;
        let mut tombstone = self.tombstones.entry(key.to_string()).or_insert(Tombstone {
            version,
            buried_at: now,
        });
        if tombstone.version < version {
            *tombstone = Tombstone {
                version,
                buried_at: now,
            };
        }
        Ok(removed)
    }

    /// Forgets tombstones buried before `cutoff`. Returns how many were dropped.
    pub fn purge_tombstones(&self, cutoff: u64) -> usize {
        let before = self.tombstones.len();
        self.tombstones
            .retain(|_, tombstone| tombstone.buried_at >= cutoff);
        before.saturating_sub(self.tombstones.len())
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    pub fn remove(&self, key: &str) -> Result<bool, DMapError> {
        Ok(self.engine.delete(key)?)
    }

    /// Deletes `key` if its entry has expired at `now`.
    pub fn evict_if_expired(&self, key: &str, now: u64) -> Result<bool, DMapError> {
        match self.load(key)? {
            Some(entry) if entry.is_expired_at(now) => self.evict(key),
            _ => Ok(false),
        }
    }

    pub fn keys(&self) -> Result<Vec<String>, DMapError> {
        Ok(self.engine.keys()?)
    }

    pub fn len(&self) -> usize {
        self.engine.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engine.is_empty()
    }

    pub fn stats(&self) -> EngineStats {
        self.engine.stats()
    }

    fn evict(&self, key: &str) -> Result<bool, DMapError> {
        let removed = self.engine.delete(key)?;
        if removed {
            Counters::incr(&self.counters.evicted);
            tracing::debug!("Evicted expired key in partition {}", self.partition);
        }
        Ok(removed)
    }
}

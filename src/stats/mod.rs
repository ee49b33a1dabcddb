//! Stats Module
//!
//! Read-only view of what this member holds and what it has done. Counters are
//! bumped by the entry engine and the lock manager; [`Stats`] is assembled on
//! demand by `DMapService::stats`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::membership::NodeId;

/// Process-wide counters.
#[derive(Debug, Default)]
pub struct Counters {
    pub evicted: AtomicU64,
    pub locks_acquired: AtomicU64,
    pub locks_released: AtomicU64,
    pub lock_contention: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn locks(&self) -> LockStats {
        LockStats {
            acquired: self.locks_acquired.load(Ordering::Relaxed),
            released: self.locks_released.load(Ordering::Relaxed),
            contention: self.lock_contention.load(Ordering::Relaxed),
        }
    }

    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stats {
    pub member: NodeId,
    pub routing_version: u64,
    pub partitions: PartitionStats,
    /// DMaps with at least one local fragment.
    pub dmaps: usize,
    /// Entries stored locally, primary and backup copies alike. Expired entries
    /// count until a read or the sweeper removes them.
    pub entries: usize,
    /// Bytes of keys and values held by the local storage engines.
    pub allocated: usize,
    pub evicted: u64,
    pub locks: LockStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeStats>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionStats {
    pub primary: usize,
    pub backup: usize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockStats {
    pub acquired: u64,
    pub released: u64,
    pub contention: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeStats {
    pub uptime_secs: u64,
    pub pid: u32,
    pub workers: usize,
    pub alive_tasks: usize,
}

impl RuntimeStats {
    /// Samples the current process and tokio runtime.
    pub fn collect(uptime_secs: u64) -> Self {
        let (workers, alive_tasks) = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let metrics = handle.metrics();
                (metrics.num_workers(), metrics.num_alive_tasks())
            }
            Err(_) => (0, 0),
        };

        Self {
            uptime_secs,
            pid: std::process::id(),
            workers,
            alive_tasks,
        }
    }
}

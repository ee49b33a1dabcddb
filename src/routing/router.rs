use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::task::JoinHandle;

use super::partitioner::{PartitionId, Partitioner};
use super::ring::HashRing;
use super::table::{PartitionOwners, RoutingTable};
use crate::config::RoutingConfig;
use crate::error::DMapError;
use crate::membership::{MembershipService, NodeId};

/// Owns the routing table of record for this process.
///
/// Readers load the current table through `ArcSwap` and never block; a rebuild
/// publishes a complete new table in one store, so in-flight requests keep the
/// snapshot they started with.
pub struct Router {
    partitioner: Partitioner,
    replica_count: usize,
    virtual_nodes: usize,
    table: ArcSwapOption<RoutingTable>,
    last_version: AtomicU64,
    rebuild_lock: Mutex<()>,
    rebuild_pending: AtomicBool,
}

impl Router {
    pub fn new(config: &RoutingConfig) -> Arc<Self> {
        Arc::new(Self {
            partitioner: Partitioner::new(config.partition_count),
            replica_count: config.replica_count.max(1),
            virtual_nodes: config.virtual_nodes,
            table: ArcSwapOption::empty(),
            last_version: AtomicU64::new(0),
            rebuild_lock: Mutex::new(()),
            rebuild_pending: AtomicBool::new(false),
        })
    }

    pub fn partition_count(&self) -> u32 {
        self.partitioner.num_partitions()
    }

    pub fn replica_count(&self) -> usize {
        self.replica_count
    }

    pub fn resolve_partition(&self, key: &str) -> PartitionId {
        self.partitioner.get_partition(key)
    }

    pub fn owners_of(&self, partition: PartitionId) -> Result<PartitionOwners, DMapError> {
        let table = self.snapshot()?;
        table.get(partition).cloned().ok_or_else(|| {
            DMapError::invalid(format!(
                "partition {} is outside [0, {})",
                partition,
                self.partition_count()
            ))
        })
    }

    pub fn snapshot(&self) -> Result<Arc<RoutingTable>, DMapError> {
        self.table.load_full().ok_or(DMapError::RoutingNotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.table.load().is_some()
    }

    /// Version of the published table, `0` when none is published.
    pub fn version(&self) -> u64 {
        self.table
            .load()
            .as_ref()
            .map(|table| table.version)
            .unwrap_or(0)
    }

    /// Rebuilds from the latest alive members.
    ///
    /// Calls that arrive while another rebuild is running only mark the table
    /// dirty; the running pass repeats once over the newest member view.
    pub fn rebuild(&self, membership: &MembershipService) {
        self.rebuild_pending.store(true, Ordering::SeqCst);
        loop {
            match self.rebuild_lock.try_lock() {
                Some(_guard) => {
                    if self.rebuild_pending.swap(false, Ordering::SeqCst) {
                        self.rebuild_with(&membership.alive_ids());
                        continue;
                    }
                }
                None => {
                    tracing::debug!("Routing rebuild in flight, coalescing");
                    return;
                }
            }
            if !self.rebuild_pending.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Computes and publishes a table for `members`. Returns the new version, or
    /// `None` when there is nobody to own partitions (the old table stays).
    pub fn rebuild_with(&self, members: &[NodeId]) -> Option<u64> {
        let ring = HashRing::new(members, self.virtual_nodes);
        if ring.is_empty() {
            tracing::warn!("Routing rebuild skipped: no alive members");
            return None;
        }

        let version = self.last_version.fetch_add(1, Ordering::SeqCst) + 1;
        let table = RoutingTable::build(
            version,
            self.partition_count(),
            &ring,
            self.replica_count,
        )?;
        self.table.store(Some(Arc::new(table)));

        tracing::info!(
            "Published routing table v{} ({} partitions over {} members)",
            version,
            self.partition_count(),
            ring.members().len()
        );
        Some(version)
    }

    /// Builds the first table and keeps rebuilding on every membership change.
    pub fn spawn_rebuilder(self: &Arc<Self>, membership: Arc<MembershipService>) -> JoinHandle<()> {
        let router = self.clone();
        let mut changes = membership.subscribe();
        tokio::spawn(async move {
            router.rebuild(&membership);
            while changes.changed().await.is_ok() {
                let generation = *changes.borrow_and_update();
                tracing::debug!("Membership generation {} observed", generation);
                router.rebuild(&membership);
            }
        })
    }

    /// Discards the table. Until the next rebuild `owners_of` reports `RoutingNotReady`.
    pub fn teardown(&self) {
        self.table.store(None);
        tracing::info!("Routing table discarded");
    }
}

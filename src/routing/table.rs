use super::partitioner::PartitionId;
use super::ring::HashRing;
use crate::membership::NodeId;
use serde::{Deserialize, Serialize};

/// Owners of one partition: exactly one primary and the backups holding copies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionOwners {
    pub id: PartitionId,
    pub primary: NodeId,
    pub backups: Vec<NodeId>,
}

impl PartitionOwners {
    pub fn is_primary(&self, node: &NodeId) -> bool {
        &self.primary == node
    }

    pub fn is_backup(&self, node: &NodeId) -> bool {
        self.backups.contains(node)
    }

    pub fn is_owner(&self, node: &NodeId) -> bool {
        self.is_primary(node) || self.is_backup(node)
    }
}

/// Immutable partition → owners assignment.
///
/// A table always covers every partition id in `[0, partition_count)`, in order.
/// Tables are never edited; a membership change produces a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoutingTable {
    pub version: u64,
    pub partitions: Vec<PartitionOwners>,
}

impl RoutingTable {
    /// Builds a full table from `ring`. Returns `None` when the ring has no members.
    pub fn build(
        version: u64,
        partition_count: u32,
        ring: &HashRing,
        replica_count: usize,
    ) -> Option<Self> {
        if ring.is_empty() {
            return None;
        }
        let replica_count = replica_count.max(1);
        let mut partitions = Vec::with_capacity(partition_count as usize);
        for id in 0..partition_count {
            let mut owners = ring.owners(id, replica_count).into_iter();
            let primary = owners.next()?;
            partitions.push(PartitionOwners {
                id,
                primary,
                backups: owners.collect(),
            });
        }
        Some(Self {
            version,
            partitions,
        })
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn get(&self, partition: PartitionId) -> Option<&PartitionOwners> {
        self.partitions.get(partition as usize)
    }

    pub fn primary_partitions(&self, node: &NodeId) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .filter(|owners| owners.is_primary(node))
            .map(|owners| owners.id)
            .collect()
    }

    pub fn backup_partitions(&self, node: &NodeId) -> Vec<PartitionId> {
        self.partitions
            .iter()
            .filter(|owners| owners.is_backup(node))
            .map(|owners| owners.id)
            .collect()
    }
}

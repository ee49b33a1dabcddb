use super::partitioner::{PartitionId, hash_bytes};
use crate::membership::NodeId;

/// Consistent-hashing ring over the live members.
///
/// Each member is placed at `virtual_nodes` points. A partition hashes onto the
/// ring and its owners are the first distinct members met walking clockwise, so
/// a membership change only moves the partitions adjacent to the affected points.
#[derive(Debug, Clone)]
pub struct HashRing {
    points: Vec<(u64, usize)>,
    members: Vec<NodeId>,
}

impl HashRing {
    pub fn new(members: &[NodeId], virtual_nodes: usize) -> Self {
        let mut members = members.to_vec();
        members.sort();
        members.dedup();

        let virtual_nodes = virtual_nodes.max(1);
        let mut points = Vec::with_capacity(members.len() * virtual_nodes);
        for (idx, member) in members.iter().enumerate() {
            for replica in 0..virtual_nodes {
                let label = format!("{}#{}", member, replica);
                points.push((hash_bytes(label.as_bytes()), idx));
            }
        }
        points.sort_unstable();

        Self { points, members }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    /// Up to `count` distinct owners for `partition`; the first one is the primary.
    pub fn owners(&self, partition: PartitionId, count: usize) -> Vec<NodeId> {
        if self.is_empty() || count == 0 {
            return Vec::new();
        }
        let count = count.min(self.members.len());
        let position = hash_bytes(format!("partition-{}", partition).as_bytes());
        let start = self.points.partition_point(|(point, _)| *point < position);

        let mut seen = vec![false; self.members.len()];
        let mut owners = Vec::with_capacity(count);
        for step in 0..self.points.len() {
            let (_, idx) = self.points[(start + step) % self.points.len()];
            if seen[idx] {
                continue;
            }
            seen[idx] = true;
            owners.push(self.members[idx].clone());
            if owners.len() == count {
                break;
            }
        }
        owners
    }
}

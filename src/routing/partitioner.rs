use std::hash::Hasher;
use twox_hash::XxHash64;

pub type PartitionId = u32;

/// Hashes arbitrary bytes onto the 64-bit key space shared by the partitioner and the ring.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(bytes);
    hasher.finish()
}

/// Maps keys onto a fixed number of partitions.
///
/// The partition count is a cluster-wide constant, so the mapping of a key never
/// changes while the cluster lives; only partition ownership moves.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    num_partitions: u32,
}

impl Partitioner {
    pub fn new(num_partitions: u32) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
        }
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    pub fn get_partition(&self, key: &str) -> PartitionId {
        (hash_bytes(key.as_bytes()) % u64::from(self.num_partitions)) as PartitionId
    }
}

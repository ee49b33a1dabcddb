//! Partition Routing Module
//!
//! Decides where every key lives.
//!
//! ## Core Concepts
//! - **Partitioning**: keys hash (XxHash64) into a fixed number of partitions.
//! - **Placement**: a consistent-hashing ring assigns each partition one primary
//!   and up to `replica_count - 1` backups.
//! - **Table of record**: the [`router::Router`] owns the current
//!   [`table::RoutingTable`] and swaps it atomically on membership changes.

pub mod partitioner;
pub mod ring;
pub mod router;
pub mod table;

pub use partitioner::{PartitionId, Partitioner};
pub use router::Router;
pub use table::{PartitionOwners, RoutingTable};

#[cfg(test)]
mod tests;

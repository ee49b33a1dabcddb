//! Partitioned, Replicated DMap Cluster Library
//!
//! Named in-memory key-value maps ("DMaps") spread over a cluster of members,
//! plus distributed locks stored in those same maps. The binary (`main.rs`)
//! wires these modules into a node served over HTTP.
//!
//! ## Architecture Modules
//!
//! - **`membership`**: the local view of which members exist and are alive, with
//!   a change signal.
//! - **`routing`**: key → partition hashing, and the routing table mapping each
//!   partition to a primary and its backups, rebuilt on membership changes.
//! - **`storage`**: pluggable byte-level engines, selected by name from a registry.
//! - **`dmap`**: the entry engine. Conditional writes, expiry, counters,
//!   forwarding to primaries and replication to backups.
//! - **`lock`**: lease-based locks with fencing tokens on top of `dmap`.
//! - **`stats`**: counters and the per-member stats snapshot.
//! - **`transport`**: how members reach each other (HTTP, or in-process loopback).
//! - **`config`** / **`error`**: node configuration and the shared error taxonomy.
//! - **`node`**: assembles one member's services.
//! - **`client`**: remote access to a running cluster over the members' HTTP API.

pub mod client;
pub mod config;
pub mod dmap;
pub mod error;
pub mod lock;
pub mod membership;
pub mod node;
pub mod routing;
pub mod stats;
pub mod storage;
pub mod transport;

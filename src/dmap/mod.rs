//! DMap Entry Engine
//!
//! Named maps whose keys are spread over the cluster's partitions.
//!
//! ## Core Concepts
//! - **Fragments**: each member keeps, per DMap, one storage engine instance for
//!   every partition it holds entries of (as primary or backup).
//! - **Per-key serialization**: every operation on a key runs under that key's
//!   lock inside its fragment, so read-modify-write operations never lose updates.
//! - **Primary-only writes**: requests for partitions owned elsewhere are forwarded
//!   to the primary, which applies them and ships [`replication::ReplicaMessage`]s
//!   to the backups.
//! - **Expiry**: checked lazily on access and swept in the background.

pub mod eviction;
pub mod fragment;
pub mod locker;
pub mod options;
pub mod replication;
pub mod service;
pub mod types;

pub use options::{PutOptions, WriteOption};
pub use replication::{ReplicaMessage, ReplicaOp};
pub use service::{DMap, DMapService};
pub use types::{Entry, Request, Response};

//! Distributed Lock Module
//!
//! Mutual exclusion per (DMap, lock name), built on the entry engine.
//!
//! ## Core Concepts
//! - **Lock as entry**: a held lock is an entry in the reserved DMap
//!   `__lock__.<dmap>`, keyed by the lock name, holding a random 16-byte token
//!   and expiring at the lease deadline.
//! - **Acquire**: an `NX` write. Whoever creates the entry owns the lock.
//! - **Fencing**: lease renewal and unlock are compare-and-swap operations on the
//!   token, so a holder whose lease ran out cannot touch the next holder's lock.

pub mod manager;

pub use manager::{LockContext, LockManager, lock_dmap_name};

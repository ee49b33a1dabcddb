//! Membership Module
//!
//! Holds this node's view of the cluster: who the members are, which of them are
//! alive, and a change signal that fires whenever that view moves.
//!
//! ## Core Mechanisms
//! - **Member view**: a `DashMap` keyed by `host:port` identity.
//! - **Incarnation numbers**: stale reports about a member never override newer ones.
//! - **Change signal**: a `watch` channel generation counter consumed by the router.
//!
//! Discovery itself (seed joins over HTTP, external failure detectors) feeds this
//! view through [`service::MembershipService::join`] and friends.

pub mod service;
pub mod types;

pub use service::MembershipService;
pub use types::{Node, NodeId, NodeState};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Stable member identity, rendered as the member's `host:port`.
///
/// The identity doubles as the address other nodes use to reach the member,
/// so it never changes for the lifetime of a process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// Represents a single member in the cluster.
///
/// `incarnation` orders competing updates about the same member: a report with a
/// lower incarnation never overrides a newer one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,
    /// Unix milliseconds at which the member process started.
    pub birthdate: u64,
}

impl Node {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            id: NodeId::from_addr(addr),
            addr,
            state: NodeState::Alive,
            incarnation: 1,
            birthdate: crate::dmap::types::now_ms(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.state == NodeState::Alive
    }
}

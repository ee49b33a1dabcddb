use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::types::{Node, NodeId, NodeState};

/// The local view of cluster membership.
///
/// Discovery and failure detection live outside this crate; whatever drives
/// them reports joins, departures and state changes here. Every change bumps a
/// generation counter published on a `watch` channel, which the router uses as
/// its rebuild signal.
pub struct MembershipService {
    pub local_node: Node,
    members: DashMap<NodeId, Node>,
    changes: watch::Sender<u64>,
}

impl MembershipService {
    pub fn new(bind_addr: SocketAddr) -> Arc<Self> {
        let local_node = Node::new(bind_addr);
        let members = DashMap::new();
        members.insert(local_node.id.clone(), local_node.clone());
        let (changes, _) = watch::channel(0);

        info!("Local member {} registered", local_node.id);

        Arc::new(Self {
            local_node,
            members,
            changes,
        })
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_node.id
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    /// Alive members ordered by identity.
    pub fn get_alive_members(&self) -> Vec<Node> {
        let mut alive: Vec<Node> = self
            .members
            .iter()
            .filter(|entry| entry.value().is_alive())
            .map(|entry| entry.value().clone())
            .collect();
        alive.sort_by(|a, b| a.id.cmp(&b.id));
        alive
    }

    pub fn alive_ids(&self) -> Vec<NodeId> {
        self.get_alive_members()
            .into_iter()
            .map(|node| node.id)
            .collect()
    }

    pub fn members(&self) -> Vec<Node> {
        let mut all: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Records a member report. Returns `true` if the view changed.
    ///
    /// Reports about a known member only win with a higher incarnation, or with
    /// the same incarnation when they bring a suspect back to alive.
    pub fn join(&self, node: Node) -> bool {
        let changed = match self.members.get_mut(&node.id) {
            Some(mut existing) => {
                if node.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {}: inc {} -> {}",
                        node.id,
                        existing.incarnation,
                        node.incarnation
                    );
                    *existing = node;
                    true
                } else if node.incarnation == existing.incarnation
                    && node.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    info!("{} refuted suspicion", node.id);
                    existing.state = NodeState::Alive;
                    true
                } else {
                    false
                }
            }
            None => {
                info!("Member {} joined at {}", node.id, node.addr);
                self.members.insert(node.id.clone(), node);
                true
            }
        };

        if changed {
            self.notify();
        }
        changed
    }

    pub fn merge(&self, nodes: Vec<Node>) -> usize {
        nodes.into_iter().filter(|node| self.join(node.clone())).count()
    }

    /// Removes a member from the view. The local member cannot leave its own view.
    pub fn leave(&self, id: &NodeId) -> bool {
        if id == self.local_id() {
            return false;
        }
        let removed = self.members.remove(id).is_some();
        if removed {
            info!("Member {} left, cluster size now {}", id, self.members.len());
            self.notify();
        }
        removed
    }

    pub fn set_state(&self, id: &NodeId, state: NodeState) -> bool {
        let changed = match self.members.get_mut(id) {
            Some(mut member) if member.state != state => {
                tracing::warn!("Member {} is now {:?}", id, state);
                member.state = state;
                true
            }
            _ => false,
        };
        if changed {
            self.notify();
        }
        changed
    }

    /// Receiver that observes every membership change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn generation(&self) -> u64 {
        *self.changes.borrow()
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }
}

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::{Arc, Weak};

use super::Transport;
use crate::dmap::{DMapService, ReplicaMessage, Request, Response};
use crate::error::DMapError;
use crate::membership::NodeId;

/// Transport between services sharing one process.
///
/// Services register themselves by member id. Members can be marked
/// unreachable to simulate a partitioned or crashed peer.
#[derive(Default)]
pub struct LoopbackTransport {
    services: DashMap<NodeId, Weak<DMapService>>,
    unreachable: DashSet<NodeId>,
}

impl LoopbackTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, service: &Arc<DMapService>) {
        self.services
            .insert(service.local_id().clone(), Arc::downgrade(service));
    }

    pub fn set_unreachable(&self, id: &NodeId, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(id.clone());
        } else {
            self.unreachable.remove(id);
        }
    }

    fn target(&self, id: &NodeId) -> Result<Arc<DMapService>, DMapError> {
        if self.unreachable.contains(id) {
            return Err(DMapError::Transport(format!("{} is unreachable", id)));
        }
        self.services
            .get(id)
            .and_then(|service| service.upgrade())
            .ok_or_else(|| DMapError::Transport(format!("no route to {}", id)))
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn forward(&self, target: &NodeId, request: Request) -> Result<Response, DMapError> {
        let service = self.target(target)?;
        service.execute(request, true).await
    }

    async fn replicate(&self, target: &NodeId, message: ReplicaMessage) -> Result<(), DMapError> {
        let service = self.target(target)?;
        service.apply_replica(message).await
    }

    async fn destroy(&self, target: &NodeId, dmap: &str) -> Result<(), DMapError> {
        let service = self.target(target)?;
        service.destroy_local(dmap);
        Ok(())
    }
}

//! One member's assembled services.

use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::dmap::{DMap, DMapService};
use crate::error::DMapError;
use crate::lock::LockManager;
use crate::membership::MembershipService;
use crate::routing::Router;
use crate::storage::{EngineRegistry, StorageError};
use crate::transport::Transport;

/// Membership view, router, entry engine and lock manager of a member, plus the
/// background tasks that keep them current.
pub struct ClusterNode {
    pub membership: Arc<MembershipService>,
    pub router: Arc<Router>,
    pub service: Arc<DMapService>,
    pub locks: Arc<LockManager>,
    tasks: Vec<JoinHandle<()>>,
}

impl ClusterNode {
    /// Builds the services and starts the routing rebuilder and the eviction
    /// sweeper. Must run inside a tokio runtime.
    pub fn start(
        config: &Config,
        registry: Arc<EngineRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, StorageError> {
        let membership = MembershipService::new(config.bind);
        let router = Router::new(&config.routing);
        router.rebuild(&membership);

        let service = DMapService::new(
            config,
            membership.clone(),
            router.clone(),
            registry,
            transport,
        )?;
        let locks = Arc::new(LockManager::new(service.clone(), &config.lock));

        let tasks = vec![
            router.spawn_rebuilder(membership.clone()),
            service.spawn_eviction(),
        ];

        Ok(Self {
            membership,
            router,
            service,
            locks,
            tasks,
        })
    }

    pub fn dmap(&self, name: &str) -> Result<DMap, DMapError> {
        self.service.dmap(name)
    }

    /// Stops background work and discards the routing table.
    pub fn shutdown(&self) {
        for task in &self.tasks {
            task.abort();
        }
        self.router.teardown();
    }
}

impl Drop for ClusterNode {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

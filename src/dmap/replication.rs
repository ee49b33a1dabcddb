use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::types::Entry;
use crate::config::{ReplicationConfig, ReplicationMode};
use crate::error::DMapError;
use crate::membership::NodeId;
use crate::routing::PartitionId;
use crate::transport::Transport;

/// Change shipped from a primary to its backups.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReplicaOp {
    Upsert { entry: Entry },
    Remove { key: String, version: i64 },
}

impl ReplicaOp {
    pub fn key(&self) -> &str {
        match self {
            Self::Upsert { entry } => &entry.key,
            Self::Remove { key, .. } => key,
        }
    }

    pub fn version(&self) -> i64 {
        match self {
            Self::Upsert { entry } => entry.version,
            Self::Remove { version, .. } => *version,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaMessage {
    pub dmap: String,
    pub partition: PartitionId,
    pub op: ReplicaOp,
}

/// Ships replica messages according to the configured mode and quorum.
#[derive(Clone)]
pub struct Replicator {
    mode: ReplicationMode,
    write_quorum: usize,
    timeout: Duration,
    transport: Arc<dyn Transport>,
}

impl Replicator {
    pub fn new(config: &ReplicationConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            mode: config.mode,
            write_quorum: config.write_quorum.max(1),
            timeout: config.timeout(),
            transport,
        }
    }

    /// Sends `message` to every backup.
    ///
    /// In sync mode the local copy counts as the first acknowledgement and the
    /// call fails with `ReplicationIncomplete` when fewer than `write_quorum`
    /// copies are confirmed. The local write is never rolled back. In async mode
    /// the sends run in the background and failures are only logged.
    pub async fn replicate(
        &self,
        backups: &[NodeId],
        message: ReplicaMessage,
    ) -> Result<(), DMapError> {
        match self.mode {
            ReplicationMode::Sync => {
                let acked = 1 + self.send_all(backups, &message).await;
                if acked < self.write_quorum {
                    tracing::warn!(
                        "Write in partition {} acknowledged by {} of {} required copies",
                        message.partition,
                        acked,
                        self.write_quorum
                    );
                    return Err(DMapError::ReplicationIncomplete {
                        acked,
                        required: self.write_quorum,
                    });
                }
                Ok(())
            }
            ReplicationMode::Async => {
                if backups.is_empty() {
                    return Ok(());
                }
                let replicator = self.clone();
                let backups = backups.to_vec();
                tokio::spawn(async move {
                    replicator.send_all(&backups, &message).await;
                });
                Ok(())
            }
        }
    }

    /// Returns how many backups acknowledged.
    async fn send_all(&self, backups: &[NodeId], message: &ReplicaMessage) -> usize {
        let mut acked = 0;
        for backup in backups {
            let send = self.transport.replicate(backup, message.clone());
            match tokio::time::timeout(self.timeout, send).await {
                Ok(Ok(())) => acked += 1,
                Ok(Err(e)) => {
                    tracing::error!(
                        "Replication to {} for partition {} failed: {}",
                        backup,
                        message.partition,
                        e
                    );
                }
                Err(_) => {
                    tracing::error!(
                        "Replication to {} for partition {} timed out after {:?}",
                        backup,
                        message.partition,
                        self.timeout
                    );
                }
            }
        }
        acked
    }
}

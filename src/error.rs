//! Error taxonomy shared by the routing layer, the entry engine and the lock manager.
//!
//! Conditional-write and lock failures are ordinary control flow and are returned
//! to the caller as-is. Infrastructure failures are marked retryable so a layer
//! above the core can decide whether to try again.

use crate::routing::PartitionId;
use crate::storage::StorageError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DMapError {
    /// Read, delete, expire or `XX` write on an absent or expired entry.
    #[error("key not found")]
    KeyNotFound,

    /// `NX` write on an existing, unexpired entry.
    #[error("key found")]
    KeyFound,

    /// Another unexpired holder owns the lock.
    #[error("lock not acquired")]
    LockNotAcquired,

    /// The lock entry is gone or carries a different token.
    #[error("no such lock")]
    NoSuchLock,

    /// No routing table has been published yet.
    #[error("routing table is not ready")]
    RoutingNotReady,

    /// A forwarded request reached a node that is not the partition's primary.
    #[error("stale routing for partition {partition}")]
    StaleRouting { partition: PartitionId },

    /// The primary applied the write but fewer than `required` copies acknowledged it.
    #[error("replication incomplete: {acked} of {required} copies acknowledged")]
    ReplicationIncomplete { acked: usize, required: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl DMapError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Whether the failure is transient infrastructure trouble rather than a
    /// terminal answer about the entry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RoutingNotReady
                | Self::StaleRouting { .. }
                | Self::ReplicationIncomplete { .. }
                | Self::Transport(_)
        )
    }

    /// Stable identifier carried in error bodies between nodes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyNotFound => "KeyNotFound",
            Self::KeyFound => "KeyFound",
            Self::LockNotAcquired => "LockNotAcquired",
            Self::NoSuchLock => "NoSuchLock",
            Self::RoutingNotReady => "RoutingNotReady",
            Self::StaleRouting { .. } => "StaleRouting",
            Self::ReplicationIncomplete { .. } => "ReplicationIncomplete",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Storage(_) => "Storage",
            Self::Transport(_) => "Transport",
            Self::Codec(_) => "Codec",
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let (partition, acked, required) = match self {
            Self::StaleRouting { partition } => (Some(*partition), None, None),
            Self::ReplicationIncomplete { acked, required } => (None, Some(*acked), Some(*required)),
            _ => (None, None, None),
        };
        ErrorBody {
            kind: self.kind().to_string(),
            message: self.to_string(),
            partition,
            acked,
            required,
        }
    }
}

/// Wire form of a [`DMapError`], so the calling node can rebuild the same variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<PartitionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<usize>,
}

impl From<ErrorBody> for DMapError {
    fn from(body: ErrorBody) -> Self {
        match body.kind.as_str() {
            "KeyNotFound" => Self::KeyNotFound,
            "KeyFound" => Self::KeyFound,
            "LockNotAcquired" => Self::LockNotAcquired,
            "NoSuchLock" => Self::NoSuchLock,
            "RoutingNotReady" => Self::RoutingNotReady,
            "StaleRouting" => Self::StaleRouting {
                partition: body.partition.unwrap_or_default(),
            },
            "ReplicationIncomplete" => Self::ReplicationIncomplete {
                acked: body.acked.unwrap_or_default(),
                required: body.required.unwrap_or_default(),
            },
            "InvalidArgument" => Self::InvalidArgument(body.message),
            "Storage" => Self::Storage(StorageError::Engine(body.message)),
            "Codec" => Self::Codec(body.message),
            _ => Self::Transport(body.message),
        }
    }
}

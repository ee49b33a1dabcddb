//! Node Network Protocol
//!
//! API endpoints and the JSON bodies exchanged between members, and between
//! clients and the member they talk to.

use serde::{Deserialize, Serialize};

use crate::dmap::Response;
use crate::error::{DMapError, ErrorBody};
use crate::lock::LockContext;
use crate::membership::{Node, NodeId};

// --- API Endpoints ---

/// A request routed here by another member for a partition this member is primary for.
pub const ENDPOINT_DMAP: &str = "/internal/dmap";
/// Primary to backup change shipping.
pub const ENDPOINT_REPLICATE: &str = "/internal/replicate";
/// Drops the local fragments of a DMap.
pub const ENDPOINT_DESTROY: &str = "/internal/destroy";
pub const ENDPOINT_JOIN: &str = "/cluster/join";
pub const ENDPOINT_LEAVE: &str = "/cluster/leave";
pub const ENDPOINT_MEMBERS: &str = "/cluster/members";
/// Current routing table (id, primary, backups per partition).
pub const ENDPOINT_ROUTING: &str = "/cluster/routing";
pub const ENDPOINT_STATS: &str = "/stats";
pub const ENDPOINT_PING: &str = "/ping";

// Client-facing. Any member accepts these and routes them itself.

/// A DMap request from a client; forwarded to the primary when needed.
pub const ENDPOINT_CLIENT_DMAP: &str = "/dmap";
/// Drops a DMap on every member.
pub const ENDPOINT_CLIENT_DESTROY: &str = "/dmap/destroy";
pub const ENDPOINT_LOCK: &str = "/lock";
pub const ENDPOINT_LEASE: &str = "/lock/lease";
pub const ENDPOINT_UNLOCK: &str = "/lock/unlock";

// --- Data Transfer Objects ---

/// Result of a forwarded request: exactly one of the two fields is set.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ReplyBody {
    pub fn ok(response: Response) -> Self {
        Self {
            response: Some(response),
            error: None,
        }
    }

    pub fn err(error: ErrorBody) -> Self {
        Self {
            response: None,
            error: Some(error),
        }
    }

    pub fn into_result(self) -> Result<Response, DMapError> {
        match (self.response, self.error) {
            (Some(response), _) => Ok(response),
            (None, Some(error)) => Err(error.into()),
            (None, None) => Err(DMapError::Transport("empty reply".to_string())),
        }
    }
}

/// Acknowledgement for replicate, destroy and leave.
#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl AckResponse {
    pub fn into_result(self) -> Result<(), DMapError> {
        match (self.success, self.error) {
            (true, _) => Ok(()),
            (false, Some(error)) => Err(error.into()),
            (false, None) => Err(DMapError::Transport("request rejected".to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DestroyRequest {
    pub dmap: String,
}

/// Sent by a starting member to a seed.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinRequest {
    pub node: Node,
}

/// The seed's member view after the join.
#[derive(Debug, Serialize, Deserialize)]
pub struct JoinResponse {
    pub members: Vec<Node>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: NodeId,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatsParams {
    #[serde(default)]
    pub runtime: bool,
}

/// Without a message the member answers `PONG`; otherwise it echoes the message.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PingRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub message: String,
}

/// Lock acquisition. With `timeout_ms` the member keeps retrying until it expires.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockRequest {
    pub dmap: String,
    pub name: String,
    pub ttl_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub context: LockContext,
    pub ttl_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub context: LockContext,
}

/// Result of lock and lease: the current context, or the error.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<LockContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl LockReply {
    pub fn into_result(self) -> Result<LockContext, DMapError> {
        match (self.context, self.error) {
            (Some(context), _) => Ok(context),
            (None, Some(error)) => Err(error.into()),
            (None, None) => Err(DMapError::Transport("empty reply".to_string())),
        }
    }
}

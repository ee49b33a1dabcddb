//! Node-to-Node Transport
//!
//! How one member reaches another. The entry engine only sees the
//! [`Transport`] trait.
//!
//! ## Implementations
//! - **HTTP** ([`http::HttpTransport`]): JSON over `reqwest`, served by the axum
//!   handlers in [`handlers`].
//! - **Loopback** ([`loopback::LoopbackTransport`]): in-process calls between
//!   services living in one runtime, used to run whole clusters in tests.

pub mod handlers;
pub mod http;
pub mod loopback;
pub mod protocol;

use async_trait::async_trait;

use crate::dmap::{ReplicaMessage, Request, Response};
use crate::error::DMapError;
use crate::membership::NodeId;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Runs `request` on `target`, which is expected to be the key's primary.
    async fn forward(&self, target: &NodeId, request: Request) -> Result<Response, DMapError>;

    /// Ships a replica change to a backup.
    async fn replicate(&self, target: &NodeId, message: ReplicaMessage) -> Result<(), DMapError>;

    /// Drops every local fragment of `dmap` on `target`.
    async fn destroy(&self, target: &NodeId, dmap: &str) -> Result<(), DMapError>;
}

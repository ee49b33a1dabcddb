use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::time::Duration;

use super::Transport;
use super::protocol::*;
use crate::dmap::{ReplicaMessage, Request, Response};
use crate::error::DMapError;
use crate::membership::{Node, NodeId};

/// JSON over HTTP. A member id is its `host:port`, so it doubles as the address.
#[derive(Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout,
        }
    }

    pub(crate) async fn post<T, R>(
        &self,
        target: &str,
        path: &str,
        payload: &T,
    ) -> Result<R, DMapError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .http_client
            .post(format!("http://{}{}", target, path))
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DMapError::Transport(format!("{} {}: {}", target, path, e)))?;

        // Error statuses still carry a JSON body describing the failure.
        response
            .json::<R>()
            .await
            .map_err(|e| DMapError::Transport(format!("{} {}: bad reply: {}", target, path, e)))
    }

    pub(crate) async fn get<R>(&self, target: &str, path: &str) -> Result<R, DMapError>
    where
        R: DeserializeOwned,
    {
        let response = self
            .http_client
            .get(format!("http://{}{}", target, path))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DMapError::Transport(format!("{} {}: {}", target, path, e)))?;

        response
            .json::<R>()
            .await
            .map_err(|e| DMapError::Transport(format!("{} {}: bad reply: {}", target, path, e)))
    }

    /// Posts with jittered exponential backoff on connection failures. Used for
    /// the join handshake, where the seed may still be starting.
    async fn post_with_retry<T, R>(
        &self,
        target: &str,
        path: &str,
        payload: &T,
        attempts: usize,
    ) -> Result<R, DMapError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            match self.post(target, path, payload).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(e);
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(DMapError::Transport("retry attempts exhausted".to_string()))
    }

    /// Announces `local` to `seed` and returns the seed's member view.
    pub async fn join(&self, seed: SocketAddr, local: &Node) -> Result<Vec<Node>, DMapError> {
        let payload = JoinRequest {
            node: local.clone(),
        };
        let reply: JoinResponse = self
            .post_with_retry(&seed.to_string(), ENDPOINT_JOIN, &payload, 5)
            .await?;
        Ok(reply.members)
    }

    /// Tells `target` that `id` is leaving.
    pub async fn leave(&self, target: &NodeId, id: &NodeId) -> Result<(), DMapError> {
        let payload = LeaveRequest { id: id.clone() };
        let reply: AckResponse = self.post(target.as_str(), ENDPOINT_LEAVE, &payload).await?;
        reply.into_result()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn forward(&self, target: &NodeId, request: Request) -> Result<Response, DMapError> {
        let reply: ReplyBody = self.post(target.as_str(), ENDPOINT_DMAP, &request).await?;
        reply.into_result()
    }

    async fn replicate(&self, target: &NodeId, message: ReplicaMessage) -> Result<(), DMapError> {
        let reply: AckResponse = self
            .post(target.as_str(), ENDPOINT_REPLICATE, &message)
            .await?;
        reply.into_result()
    }

    async fn destroy(&self, target: &NodeId, dmap: &str) -> Result<(), DMapError> {
        let payload = DestroyRequest {
            dmap: dmap.to_string(),
        };
        let reply: AckResponse = self
            .post(target.as_str(), ENDPOINT_DESTROY, &payload)
            .await?;
        reply.into_result()
    }
}

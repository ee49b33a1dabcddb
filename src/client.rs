//! Client for a running cluster.
//!
//! Talks to members over their client-facing HTTP endpoints. Members route every
//! request themselves, so any reachable member will do; seeds are tried in order
//! and the next one is used when a member cannot be reached.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::time::Duration;

use crate::dmap::options::ttl_millis;
use crate::dmap::service::{unexpected, validate_dmap_name};
use crate::dmap::{PutOptions, Request, Response, WriteOption};
use crate::error::DMapError;
use crate::lock::LockContext;
use crate::membership::Node;
use crate::routing::RoutingTable;
use crate::stats::Stats;
use crate::transport::http::HttpTransport;
use crate::transport::protocol::*;

#[derive(Clone)]
pub struct ClusterClient {
    transport: HttpTransport,
    seeds: Vec<SocketAddr>,
}

impl ClusterClient {
    pub fn new(seeds: Vec<SocketAddr>, timeout: Duration) -> Result<Self, DMapError> {
        if seeds.is_empty() {
            return Err(DMapError::invalid("at least one seed is required"));
        }
        Ok(Self {
            transport: HttpTransport::new(timeout),
            seeds,
        })
    }

    async fn post<T, R>(&self, path: &str, payload: &T) -> Result<R, DMapError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut last_error = None;
        for seed in &self.seeds {
            match self.transport.post(&seed.to_string(), path, payload).await {
                Err(e @ DMapError::Transport(_)) => {
                    tracing::debug!("Seed {} unavailable: {}", seed, e);
                    last_error = Some(e);
                }
                other => return other,
            }
        }
        Err(last_error.unwrap_or_else(|| DMapError::Transport("no seeds".to_string())))
    }

    async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, DMapError> {
        let mut last_error = None;
        for seed in &self.seeds {
            match self.transport.get(&seed.to_string(), path).await {
                Err(e @ DMapError::Transport(_)) => {
                    tracing::debug!("Seed {} unavailable: {}", seed, e);
                    last_error = Some(e);
                }
                other => return other,
            }
        }
        Err(last_error.unwrap_or_else(|| DMapError::Transport("no seeds".to_string())))
    }

    /// Checks that the member at `addr` answers.
    pub async fn ping(&self, addr: SocketAddr) -> Result<(), DMapError> {
        let reply: PingResponse = self
            .transport
            .post(&addr.to_string(), ENDPOINT_PING, &PingRequest::default())
            .await?;
        if reply.message != "PONG" {
            return Err(DMapError::Transport(format!(
                "unexpected ping reply from {}: {}",
                addr, reply.message
            )));
        }
        Ok(())
    }

    /// Sends `message` to the member at `addr` and returns its echo.
    pub async fn ping_with_message(
        &self,
        addr: SocketAddr,
        message: &str,
    ) -> Result<String, DMapError> {
        let payload = PingRequest {
            message: Some(message.to_string()),
        };
        let reply: PingResponse = self
            .transport
            .post(&addr.to_string(), ENDPOINT_PING, &payload)
            .await?;
        Ok(reply.message)
    }

    pub async fn routing_table(&self) -> Result<RoutingTable, DMapError> {
        let table: Option<RoutingTable> = self.get(ENDPOINT_ROUTING).await?;
        table.ok_or(DMapError::RoutingNotReady)
    }

    pub async fn members(&self) -> Result<Vec<Node>, DMapError> {
        self.get(ENDPOINT_MEMBERS).await
    }

    /// Stats of the first reachable seed.
    pub async fn stats(&self, collect_runtime: bool) -> Result<Stats, DMapError> {
        let path = format!("{}?runtime={}", ENDPOINT_STATS, collect_runtime);
        self.get(&path).await
    }

    /// Handle to the DMap `name`. Reserved and empty names are refused here.
    pub fn dmap(&self, name: &str) -> Result<ClientDMap, DMapError> {
        validate_dmap_name(name)?;
        Ok(ClientDMap {
            name: name.to_string(),
            client: self.clone(),
        })
    }

    async fn execute(&self, request: Request) -> Result<Response, DMapError> {
        let reply: ReplyBody = self.post(ENDPOINT_CLIENT_DMAP, &request).await?;
        reply.into_result()
    }

    pub async fn lease(&self, ctx: &mut LockContext, ttl: Duration) -> Result<(), DMapError> {
        let payload = LeaseRequest {
            context: ctx.clone(),
            ttl_ms: ttl_millis(ttl)?,
        };
        let reply: LockReply = self.post(ENDPOINT_LEASE, &payload).await?;
        *ctx = reply.into_result()?;
        Ok(())
    }

    pub async fn unlock(&self, ctx: &LockContext) -> Result<(), DMapError> {
        let payload = UnlockRequest {
            context: ctx.clone(),
        };
        let reply: AckResponse = self.post(ENDPOINT_UNLOCK, &payload).await?;
        reply.into_result()
    }
}

/// Remote counterpart of [`crate::dmap::DMap`].
#[derive(Clone)]
pub struct ClientDMap {
    name: String,
    client: ClusterClient,
}

impl ClientDMap {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn put(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        options: &[WriteOption],
    ) -> Result<(), DMapError> {
        let request = Request::Put {
            dmap: self.name.clone(),
            key: key.to_string(),
            value: value.into(),
            options: PutOptions::parse(options)?,
        };
        self.client.execute(request).await.map(|_| ())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, DMapError> {
        let request = Request::Get {
            dmap: self.name.clone(),
            key: key.to_string(),
        };
        match self.client.execute(request).await? {
            Response::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_put(
        &self,
        key: &str,
        value: impl Into<Bytes>,
    ) -> Result<Option<Bytes>, DMapError> {
        let request = Request::GetPut {
            dmap: self.name.clone(),
            key: key.to_string(),
            value: value.into(),
        };
        match self.client.execute(request).await? {
            Response::Previous(previous) => Ok(previous),
            other => Err(unexpected(other)),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), DMapError> {
        let request = Request::Delete {
            dmap: self.name.clone(),
            key: key.to_string(),
        };
        self.client.execute(request).await.map(|_| ())
    }

    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64, DMapError> {
        let request = Request::Incr {
            dmap: self.name.clone(),
            key: key.to_string(),
            delta,
        };
        match self.client.execute(request).await? {
            Response::Counter(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    pub async fn decr(&self, key: &str, delta: i64) -> Result<i64, DMapError> {
        let delta = delta
            .checked_neg()
            .ok_or_else(|| DMapError::invalid("counter overflow"))?;
        self.incr(key, delta).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<(), DMapError> {
        let request = Request::Expire {
            dmap: self.name.clone(),
            key: key.to_string(),
            ttl_ms: ttl_millis(ttl)?,
        };
        self.client.execute(request).await.map(|_| ())
    }

    pub async fn destroy(&self) -> Result<(), DMapError> {
        let payload = DestroyRequest {
            dmap: self.name.clone(),
        };
        let reply: AckResponse = self
            .client
            .post(ENDPOINT_CLIENT_DESTROY, &payload)
            .await?;
        reply.into_result()
    }

    pub async fn lock(&self, name: &str, ttl: Duration) -> Result<LockContext, DMapError> {
        self.request_lock(name, ttl, None).await
    }

    pub async fn lock_with_timeout(
        &self,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<LockContext, DMapError> {
        let timeout_ms = u64::try_from(timeout.as_millis())
            .map_err(|_| DMapError::invalid("lock timeout is too large"))?;
        self.request_lock(name, ttl, Some(timeout_ms)).await
    }

    async fn request_lock(
        &self,
        name: &str,
        ttl: Duration,
        timeout_ms: Option<u64>,
    ) -> Result<LockContext, DMapError> {
        let payload = LockRequest {
            dmap: self.name.clone(),
            name: name.to_string(),
            ttl_ms: ttl_millis(ttl)?,
            timeout_ms,
        };
        let reply: LockReply = self.client.post(ENDPOINT_LOCK, &payload).await?;
        reply.into_result()
    }

    pub async fn lease(&self, ctx: &mut LockContext, ttl: Duration) -> Result<(), DMapError> {
        self.client.lease(ctx, ttl).await
    }

    pub async fn unlock(&self, ctx: &LockContext) -> Result<(), DMapError> {
        self.client.unlock(ctx).await
    }
}

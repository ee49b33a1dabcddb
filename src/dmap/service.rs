use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as Slot;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::fragment::Fragment;
use super::options::{Condition, PutOptions, WriteOption, ttl_millis};
use super::replication::{ReplicaMessage, ReplicaOp, Replicator};
use super::types::{Entry, Request, Response, next_version, now_ms};
use crate::config::{Config, EngineConfig, EvictionConfig};
use crate::error::DMapError;
use crate::membership::{MembershipService, NodeId};
use crate::routing::{PartitionId, Router};
use crate::stats::{Counters, PartitionStats, RuntimeStats, Stats};
use crate::storage::{EngineRegistry, StorageError};
use crate::transport::Transport;

/// Prefix reserved for internal DMaps such as lock namespaces.
pub const RESERVED_PREFIX: &str = "__";

type Fragments = DashMap<PartitionId, Arc<Fragment>>;

/// Checks a user-facing DMap name: non-empty and outside the reserved prefix.
pub fn validate_dmap_name(name: &str) -> Result<(), DMapError> {
    if name.is_empty() {
        return Err(DMapError::invalid("dmap name must not be empty"));
    }
    if name.starts_with(RESERVED_PREFIX) {
        return Err(DMapError::invalid(format!(
            "dmap names starting with {} are reserved",
            RESERVED_PREFIX
        )));
    }
    Ok(())
}

/// The entry engine of one member.
///
/// Owns the local fragments of every DMap, applies requests for partitions this
/// member is primary for, forwards the rest, and applies replica messages from
/// other primaries.
pub struct DMapService {
    membership: Arc<MembershipService>,
    router: Arc<Router>,
    registry: Arc<EngineRegistry>,
    engine: EngineConfig,
    pub(super) eviction: EvictionConfig,
    replicator: Replicator,
    transport: Arc<dyn Transport>,
    pub(super) dmaps: DashMap<String, Arc<Fragments>>,
    counters: Arc<Counters>,
    started_at: Instant,
}

impl DMapService {
    pub fn new(
        config: &Config,
        membership: Arc<MembershipService>,
        router: Arc<Router>,
        registry: Arc<EngineRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Result<Arc<Self>, StorageError> {
        let mut engine = config.engine.clone();
        engine.sanitize(&registry)?;

        tracing::info!(
            "Entry engine ready: storage={} replication={:?} quorum={}",
            engine.name,
            config.replication.mode,
            config.replication.write_quorum
        );

        Ok(Arc::new(Self {
            membership,
            router,
            registry,
            engine,
            eviction: config.eviction.clone(),
            replicator: Replicator::new(&config.replication, transport.clone()),
            transport,
            dmaps: DashMap::new(),
            counters: Arc::new(Counters::default()),
            started_at: Instant::now(),
        }))
    }

    /// Handle to a user DMap. Names starting with `__` are reserved.
    pub fn dmap(self: &Arc<Self>, name: &str) -> Result<DMap, DMapError> {
        validate_dmap_name(name)?;
        Ok(self.internal_dmap(name))
    }

    /// Handle to any DMap, reserved names included.
    pub(crate) fn internal_dmap(self: &Arc<Self>, name: &str) -> DMap {
        DMap {
            name: name.to_string(),
            service: self.clone(),
        }
    }

    pub fn membership(&self) -> &Arc<MembershipService> {
        &self.membership
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub fn local_id(&self) -> &NodeId {
        self.membership.local_id()
    }

    /// Routes `request` to its primary and runs it there.
    ///
    /// `forwarded` marks a request that another member already routed here; such a
    /// request is never forwarded again and fails with `StaleRouting` when this
    /// member's table disagrees.
    pub async fn execute(
        self: &Arc<Self>,
        request: Request,
        forwarded: bool,
    ) -> Result<Response, DMapError> {
        if request.key().is_empty() {
            return Err(DMapError::invalid("key must not be empty"));
        }

        let partition = self.router.resolve_partition(request.key());
        let owners = self.router.owners_of(partition)?;

        if !owners.is_primary(self.local_id()) {
            if forwarded {
                tracing::warn!(
                    "Forwarded {} for partition {} but primary is {}",
                    request.op(),
                    partition,
                    owners.primary
                );
                return Err(DMapError::StaleRouting { partition });
            }
            tracing::debug!(
                "Forwarding {} for partition {} to {}",
                request.op(),
                partition,
                owners.primary
            );
            return self.transport.forward(&owners.primary, request).await;
        }

        self.apply_local(request, partition, owners.backups).await
    }

    async fn apply_local(
        self: &Arc<Self>,
        request: Request,
        partition: PartitionId,
        backups: Vec<NodeId>,
    ) -> Result<Response, DMapError> {
        let fragment = if request.creates_entry() {
            self.fragment(request.dmap(), partition)?
        } else {
            match self.existing_fragment(request.dmap(), partition) {
                Some(fragment) => fragment,
                None => return absent(&request),
            }
        };

        let guard = fragment.lock(request.key()).await;

        if matches!(request, Request::Get { .. }) {
            let (response, _) = apply(&fragment, request)?;
            drop(guard);
            return Ok(response);
        }

        // From here on the mutation and its replication run to completion even
        // if the caller goes away.
        let replicator = self.replicator.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            let dmap = request.dmap().to_string();
            let (response, op) = apply(&fragment, request)?;
            if let Some(op) = op {
                let message = ReplicaMessage {
                    dmap,
                    partition,
                    op,
                };
                replicator.replicate(&backups, message).await?;
            }
            Ok::<_, DMapError>(response)
        });

        task.await.map_err(|e| {
            DMapError::Storage(StorageError::Engine(format!("apply task aborted: {}", e)))
        })?
    }

    /// Applies a change shipped by a primary. Changes older than the stored entry,
    /// or than the last replicated removal of the key, are ignored.
    pub async fn apply_replica(&self, message: ReplicaMessage) -> Result<(), DMapError> {
        let fragment = self.fragment(&message.dmap, message.partition)?;
        let _guard = fragment.lock(message.op.key()).await;

        let key = message.op.key();
        let known_version = fragment
            .load(key)?
            .map(|stored| stored.version)
            .max(fragment.tombstone(key));
        if let Some(known_version) = known_version.filter(|v| *v > message.op.version()) {
            tracing::debug!(
                "Ignoring stale replica for partition {} (v{} < v{})",
                message.partition,
                message.op.version(),
                known_version
            );
            return Ok(());
        }

        match message.op {
            ReplicaOp::Upsert { entry } => fragment.store(&entry)?,
            ReplicaOp::Remove { key, version } => {
                fragment.bury(&key, version, now_ms())?;
            }
        }

        tracing::debug!("Stored replica for partition {}", message.partition);
        Ok(())
    }

    /// Drops `dmap` here and on every other alive member.
    pub async fn destroy(&self, dmap: &str) -> Result<(), DMapError> {
        self.destroy_local(dmap);

        let mut failed = Vec::new();
        for member in self.membership.alive_ids() {
            if &member == self.local_id() {
                continue;
            }
            if let Err(e) = self.transport.destroy(&member, dmap).await {
                tracing::error!("Destroy of {} on {} failed: {}", dmap, member, e);
                failed.push(member.to_string());
            }
        }

        if !failed.is_empty() {
            return Err(DMapError::Transport(format!(
                "destroy of {} not confirmed by {}",
                dmap,
                failed.join(", ")
            )));
        }
        Ok(())
    }

    /// Releases every local fragment of `dmap`. Returns whether anything was held.
    pub fn destroy_local(&self, dmap: &str) -> bool {
        match self.dmaps.remove(dmap) {
            Some((_, fragments)) => {
                tracing::info!("Destroyed dmap {} ({} fragments)", dmap, fragments.len());
                true
            }
            None => false,
        }
    }

    pub fn stats(&self, collect_runtime: bool) -> Stats {
        let local = self.local_id();
        let (routing_version, partitions) = match self.router.snapshot() {
            Ok(table) => (
                table.version,
                PartitionStats {
                    primary: table.primary_partitions(local).len(),
                    backup: table.backup_partitions(local).len(),
                },
            ),
            Err(_) => (0, PartitionStats::default()),
        };

        let mut entries = 0;
        let mut allocated = 0;
        for dmap in self.dmaps.iter() {
            for fragment in dmap.value().iter() {
                let engine = fragment.value().stats();
                entries += engine.length;
                allocated += engine.allocated;
            }
        }

        Stats {
            member: local.clone(),
            routing_version,
            partitions,
            dmaps: self.dmaps.len(),
            entries,
            allocated,
            evicted: self.counters.evicted(),
            locks: self.counters.locks(),
            runtime: collect_runtime
                .then(|| RuntimeStats::collect(self.started_at.elapsed().as_secs())),
        }
    }

    fn fragment(&self, dmap: &str, partition: PartitionId) -> Result<Arc<Fragment>, DMapError> {
        let fragments = self.dmaps.entry(dmap.to_string()).or_default().clone();

        match fragments.entry(partition) {
            Slot::Occupied(slot) => Ok(slot.get().clone()),
            Slot::Vacant(slot) => {
                let engine = self.registry.create(&self.engine)?;
                let fragment = Arc::new(Fragment::new(partition, engine, self.counters.clone()));
                slot.insert(fragment.clone());
                tracing::debug!("Created fragment of {} for partition {}", dmap, partition);
                Ok(fragment)
            }
        }
    }

    fn existing_fragment(&self, dmap: &str, partition: PartitionId) -> Option<Arc<Fragment>> {
        let fragments = self.dmaps.get(dmap)?.value().clone();
        let fragment = fragments.get(&partition)?.value().clone();
        Some(fragment)
    }
}

/// Outcome of a request against a fragment that does not exist.
fn absent(request: &Request) -> Result<Response, DMapError> {
    match request {
        Request::Delete { .. } => Ok(Response::Done),
        _ => Err(DMapError::KeyNotFound),
    }
}

/// Runs one request against `fragment`. The caller holds the key lock.
fn apply(
    fragment: &Fragment,
    request: Request,
) -> Result<(Response, Option<ReplicaOp>), DMapError> {
    let now = now_ms();

    match request {
        Request::Get { key, .. } => {
            let entry = fragment.load_live(&key, now)?.ok_or(DMapError::KeyNotFound)?;
            Ok((Response::Value(entry.value), None))
        }
        Request::Put {
            key,
            value,
            options,
            ..
        } => {
            let exists = fragment.load_live(&key, now)?.is_some();
            match options.condition {
                Some(Condition::IfAbsent) if exists => return Err(DMapError::KeyFound),
                Some(Condition::IfPresent) if !exists => return Err(DMapError::KeyNotFound),
                _ => {}
            }
            let entry = Entry {
                key,
                value,
                expires_at: options.expires_at(now),
                version: next_version(),
            };
            fragment.store(&entry)?;
            Ok((Response::Done, Some(ReplicaOp::Upsert { entry })))
        }
        Request::GetPut { key, value, .. } => {
            let previous = fragment.load_live(&key, now)?.map(|entry| entry.value);
            let entry = Entry {
                key,
                value,
                expires_at: None,
                version: next_version(),
            };
            fragment.store(&entry)?;
            Ok((Response::Previous(previous), Some(ReplicaOp::Upsert { entry })))
        }
        Request::Delete { key, .. } => {
            if !fragment.remove(&key)? {
                return Ok((Response::Done, None));
            }
            let op = ReplicaOp::Remove {
                key,
                version: next_version(),
            };
            Ok((Response::Done, Some(op)))
        }
        Request::Incr { key, delta, .. } => {
            let current = fragment.load_live(&key, now)?;
            let base = match &current {
                Some(entry) => parse_counter(&entry.value)?,
                None => 0,
            };
            let next = base
                .checked_add(delta)
                .ok_or_else(|| DMapError::invalid("counter overflow"))?;
            let entry = Entry {
                key,
                value: Bytes::from(next.to_string()),
                expires_at: current.and_then(|entry| entry.expires_at),
                version: next_version(),
            };
            fragment.store(&entry)?;
            Ok((Response::Counter(next), Some(ReplicaOp::Upsert { entry })))
        }
        Request::Expire { key, ttl_ms, .. } => {
            let entry = fragment.load_live(&key, now)?.ok_or(DMapError::KeyNotFound)?;
            expire(fragment, entry, now, ttl_ms)
        }
        Request::CompareAndDelete { key, expected, .. } => {
            match fragment.load_live(&key, now)? {
                Some(entry) if entry.value == expected => {
                    fragment.remove(&key)?;
                    let op = ReplicaOp::Remove {
                        key,
                        version: next_version(),
                    };
                    Ok((Response::Done, Some(op)))
                }
                _ => Err(DMapError::KeyNotFound),
            }
        }
        Request::CompareAndExpire {
            key,
            expected,
            ttl_ms,
            ..
        } => match fragment.load_live(&key, now)? {
            Some(entry) if entry.value == expected => expire(fragment, entry, now, ttl_ms),
            _ => Err(DMapError::KeyNotFound),
        },
    }
}

fn expire(
    fragment: &Fragment,
    mut entry: Entry,
    now: u64,
    ttl_ms: u64,
) -> Result<(Response, Option<ReplicaOp>), DMapError> {
    if ttl_ms == 0 {
        return Err(DMapError::invalid("ttl must be at least one millisecond"));
    }
    entry.expires_at = Some(now.saturating_add(ttl_ms));
    entry.version = next_version();
    fragment.store(&entry)?;
    Ok((Response::Done, Some(ReplicaOp::Upsert { entry })))
}

fn parse_counter(value: &Bytes) -> Result<i64, DMapError> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(|| DMapError::invalid("value is not an integer"))
}

pub(crate) fn unexpected(response: Response) -> DMapError {
    DMapError::Codec(format!("unexpected response: {:?}", response))
}

/// Client handle for one named DMap.
#[derive(Clone)]
pub struct DMap {
    name: String,
    service: Arc<DMapService>,
}

impl DMap {
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
        self.service.execute(request, false).await.map(|_| ())
    }

    pub async fn get(&self, key: &str) -> Result<Bytes, DMapError> {
        let request = Request::Get {
            dmap: self.name.clone(),
            key: key.to_string(),
        };
        match self.service.execute(request, false).await? {
            Response::Value(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    /// Stores `value` without expiry and returns the previous live value.
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
        match self.service.execute(request, false).await? {
            Response::Previous(previous) => Ok(previous),
            other => Err(unexpected(other)),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), DMapError> {
        let request = Request::Delete {
            dmap: self.name.clone(),
            key: key.to_string(),
        };
        self.service.execute(request, false).await.map(|_| ())
    }

    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64, DMapError> {
        let request = Request::Incr {
            dmap: self.name.clone(),
            key: key.to_string(),
            delta,
        };
        match self.service.execute(request, false).await? {
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
        self.service.execute(request, false).await.map(|_| ())
    }

    /// Deletes `key` only if it currently holds `expected`.
    pub async fn compare_and_delete(
        &self,
        key: &str,
        expected: impl Into<Bytes>,
    ) -> Result<(), DMapError> {
        let request = Request::CompareAndDelete {
            dmap: self.name.clone(),
            key: key.to_string(),
            expected: expected.into(),
        };
        self.service.execute(request, false).await.map(|_| ())
    }

    /// Replaces the expiry of `key` only if it currently holds `expected`.
    pub async fn compare_and_expire(
        &self,
        key: &str,
        expected: impl Into<Bytes>,
        ttl: Duration,
    ) -> Result<(), DMapError> {
        let request = Request::CompareAndExpire {
            dmap: self.name.clone(),
            key: key.to_string(),
            expected: expected.into(),
            ttl_ms: ttl_millis(ttl)?,
        };
        self.service.execute(request, false).await.map(|_| ())
    }

    /// Removes every entry of this DMap on every member.
    pub async fn destroy(&self) -> Result<(), DMapError> {
        self.service.destroy(&self.name).await
    }
}

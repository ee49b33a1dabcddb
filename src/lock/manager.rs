use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::dmap::options::ttl_millis;
use crate::dmap::{DMap, DMapService, WriteOption};
use crate::error::DMapError;
use crate::membership::NodeId;
use crate::stats::Counters;

const LOCK_PREFIX: &str = "__lock__.";

/// Reserved DMap holding the locks of `dmap`.
pub fn lock_dmap_name(dmap: &str) -> String {
    format!("{}{}", LOCK_PREFIX, dmap)
}

/// Proof of a successful acquisition.
///
/// Holding a context does not mean the lock is still held: every `lease` and
/// `unlock` re-checks the stored token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockContext {
    pub dmap: String,
    pub name: String,
    pub token: Uuid,
    pub owner: NodeId,
    /// Lease deadline as last set by this holder.
    pub deadline: SystemTime,
}

impl LockContext {
    fn token_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.token.as_bytes())
    }
}

fn deadline_after(ttl: Duration) -> Result<SystemTime, DMapError> {
    SystemTime::now()
        .checked_add(ttl)
        .ok_or_else(|| DMapError::invalid("lock ttl is too large"))
}

pub struct LockManager {
    service: Arc<DMapService>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(service: Arc<DMapService>, config: &LockConfig) -> Self {
        Self {
            service,
            config: config.clone(),
        }
    }

    fn store(&self, dmap: &str) -> Result<DMap, DMapError> {
        // Validates the user-facing name before mapping it into the reserved space.
        self.service.dmap(dmap)?;
        Ok(self.service.internal_dmap(&lock_dmap_name(dmap)))
    }

    fn counters(&self) -> &Counters {
        self.service.counters()
    }

    /// One acquisition attempt. Fails with `LockNotAcquired` if a live holder exists.
    ///
    /// If the entry is written but too few copies acknowledge it, the entry is
    /// taken back before `ReplicationIncomplete` is returned, so a retry can
    /// acquire the lock.
    pub async fn lock(
        &self,
        dmap: &str,
        name: &str,
        ttl: Duration,
    ) -> Result<LockContext, DMapError> {
        ttl_millis(ttl)?;
        let deadline = deadline_after(ttl)?;
        let store = self.store(dmap)?;
        let token = Uuid::new_v4();
        let token_bytes = Bytes::copy_from_slice(token.as_bytes());

        let acquired = store
            .put(
                name,
                token_bytes.clone(),
                &[WriteOption::Nx, WriteOption::Px(ttl)],
            )
            .await;

        match acquired {
            Ok(()) => {
                Counters::incr(&self.counters().locks_acquired);
                tracing::debug!("Lock {}/{} acquired", dmap, name);
                Ok(LockContext {
                    dmap: dmap.to_string(),
                    name: name.to_string(),
                    token,
                    owner: self.service.local_id().clone(),
                    deadline,
                })
            }
            Err(DMapError::KeyFound) => {
                Counters::incr(&self.counters().lock_contention);
                Err(DMapError::LockNotAcquired)
            }
            Err(e @ DMapError::ReplicationIncomplete { .. }) => {
                tracing::warn!("Lock {}/{} under-replicated, rolling back: {}", dmap, name, e);
                match store.compare_and_delete(name, token_bytes).await {
                    // The primary copy is gone even when the removal is itself
                    // under-replicated; backups hold the entry until it expires.
                    Ok(()) | Err(DMapError::ReplicationIncomplete { .. }) => {}
                    Err(DMapError::KeyNotFound) => {}
                    Err(rollback) => {
                        tracing::error!("Rollback of lock {}/{} failed: {}", dmap, name, rollback);
                    }
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Retries [`lock`](Self::lock) with jittered exponential backoff until it
    /// succeeds or `timeout` elapses. Dropping the future stops the retries.
    pub async fn lock_with_timeout(
        &self,
        dmap: &str,
        name: &str,
        ttl: Duration,
        timeout: Duration,
    ) -> Result<LockContext, DMapError> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| DMapError::invalid("lock timeout is too large"))?;
        let retry_max = self.config.retry_max();
        let mut backoff = self.config.retry_initial();

        loop {
            match self.lock(dmap, name, ttl).await {
                Err(DMapError::LockNotAcquired) => {}
                Err(e @ DMapError::ReplicationIncomplete { .. }) => {
                    tracing::debug!("Retrying lock {}/{}: {}", dmap, name, e);
                }
                other => return other,
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!("Lock {}/{} not acquired within {:?}", dmap, name, timeout);
                return Err(DMapError::LockNotAcquired);
            }

            let spread = backoff.as_millis() as u64 / 2 + 1;
            let jitter = Duration::from_millis(rand::random::<u64>() % spread);
            tokio::time::sleep((backoff + jitter).min(deadline - now)).await;
            backoff = (backoff * 2).min(retry_max);
        }
    }

    /// Moves the lease deadline to `ttl` from now. `NoSuchLock` if the lock is no
    /// longer held with this context's token.
    pub async fn lease(&self, ctx: &mut LockContext, ttl: Duration) -> Result<(), DMapError> {
        let deadline = deadline_after(ttl)?;
        let store = self.store(&ctx.dmap)?;
        match store.compare_and_expire(&ctx.name, ctx.token_bytes(), ttl).await {
            Ok(()) => {
                ctx.deadline = deadline;
                Ok(())
            }
            Err(DMapError::KeyNotFound) => Err(DMapError::NoSuchLock),
            Err(e) => Err(e),
        }
    }

    /// Releases the lock. `NoSuchLock` if it expired or changed hands meanwhile.
    pub async fn unlock(&self, ctx: &LockContext) -> Result<(), DMapError> {
        let store = self.store(&ctx.dmap)?;
        match store.compare_and_delete(&ctx.name, ctx.token_bytes()).await {
            Ok(()) => {
                Counters::incr(&self.counters().locks_released);
                tracing::debug!("Lock {}/{} released", ctx.dmap, ctx.name);
                Ok(())
            }
            Err(DMapError::KeyNotFound) => Err(DMapError::NoSuchLock),
            Err(e) => Err(e),
        }
    }
}

//! Background removal of expired entries.
//!
//! Reads already drop expired entries lazily; the sweeper catches the ones
//! nobody reads again. Each pass samples a bounded number of keys per fragment
//! and forgets removal tombstones older than `eviction.tombstone_ttl_ms`.

use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::fragment::Fragment;
use super::service::DMapService;
use super::types::now_ms;
use crate::error::DMapError;

impl DMapService {
    /// One pass over every local fragment. Returns the number of evicted entries.
    pub async fn sweep_once(&self) -> usize {
        let fragments: Vec<Arc<Fragment>> = self
            .dmaps
            .iter()
            .flat_map(|dmap| {
                dmap.value()
                    .iter()
                    .map(|fragment| fragment.value().clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut evicted = 0;
        for fragment in fragments {
            match self.sweep_fragment(&fragment).await {
                Ok(count) => evicted += count,
                Err(e) => {
                    tracing::error!(
                        "Eviction sweep of partition {} failed: {}",
                        fragment.partition(),
                        e
                    );
                }
            }
        }
        evicted
    }

    async fn sweep_fragment(&self, fragment: &Fragment) -> Result<usize, DMapError> {
        let limit = self.eviction.max_keys_per_sweep;
        let sample: Vec<String> = {
            let mut keys = fragment.keys()?;
            if keys.len() > limit {
                let mut rng = rand::thread_rng();
                let (chosen, _) = keys.partial_shuffle(&mut rng, limit);
                chosen.to_vec()
            } else {
                keys
            }
        };

        let cutoff = now_ms().saturating_sub(self.eviction.tombstone_ttl_ms);
        let purged = fragment.purge_tombstones(cutoff);
        if purged > 0 {
            tracing::debug!(
                "Forgot {} tombstones in partition {}",
                purged,
                fragment.partition()
            );
        }

        let mut evicted = 0;
        for key in sample {
            let _guard = fragment.lock(&key).await;
            if fragment.evict_if_expired(&key, now_ms())? {
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Runs [`sweep_once`](Self::sweep_once) every `eviction.interval_ms`.
    pub fn spawn_eviction(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.clone();
        let period = self.eviction.interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let evicted = service.sweep_once().await;
                if evicted > 0 {
                    tracing::debug!("Eviction sweep removed {} expired entries", evicted);
                }
            }
        })
    }
}

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::options::PutOptions;
use crate::error::DMapError;

/// Unix time in milliseconds. Every expiry decision on a node reads this clock.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

static LAST_VERSION: AtomicI64 = AtomicI64::new(0);

/// Wall-clock nanoseconds, forced strictly above every version handed out
/// before on this node.
pub fn next_version() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64;
    let mut last = LAST_VERSION.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_VERSION.compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// A stored value with its lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub key: String,
    pub value: Bytes,
    /// Unix milliseconds; `None` never expires.
    pub expires_at: Option<u64>,
    pub version: i64,
}

impl Entry {
    pub fn is_expired_at(&self, now: u64) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    pub fn encode(&self) -> Result<Vec<u8>, DMapError> {
        bincode::serialize(self).map_err(|e| DMapError::Codec(e.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, DMapError> {
        bincode::deserialize(raw).map_err(|e| DMapError::Codec(e.to_string()))
    }
}

/// One operation on one key of one DMap. This is what travels to the primary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Request {
    Put {
        dmap: String,
        key: String,
        value: Bytes,
        options: PutOptions,
    },
    Get {
        dmap: String,
        key: String,
    },
    GetPut {
        dmap: String,
        key: String,
        value: Bytes,
    },
    Delete {
        dmap: String,
        key: String,
    },
    Incr {
        dmap: String,
        key: String,
        delta: i64,
    },
    Expire {
        dmap: String,
        key: String,
        ttl_ms: u64,
    },
    CompareAndDelete {
        dmap: String,
        key: String,
        expected: Bytes,
    },
    CompareAndExpire {
        dmap: String,
        key: String,
        expected: Bytes,
        ttl_ms: u64,
    },
}

impl Request {
    pub fn dmap(&self) -> &str {
        match self {
            Self::Put { dmap, .. }
            | Self::Get { dmap, .. }
            | Self::GetPut { dmap, .. }
            | Self::Delete { dmap, .. }
            | Self::Incr { dmap, .. }
            | Self::Expire { dmap, .. }
            | Self::CompareAndDelete { dmap, .. }
            | Self::CompareAndExpire { dmap, .. } => dmap,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. }
            | Self::Get { key, .. }
            | Self::GetPut { key, .. }
            | Self::Delete { key, .. }
            | Self::Incr { key, .. }
            | Self::Expire { key, .. }
            | Self::CompareAndDelete { key, .. }
            | Self::CompareAndExpire { key, .. } => key,
        }
    }

    /// Short operation name for logs.
    pub fn op(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Get { .. } => "get",
            Self::GetPut { .. } => "get_put",
            Self::Delete { .. } => "delete",
            Self::Incr { .. } => "incr",
            Self::Expire { .. } => "expire",
            Self::CompareAndDelete { .. } => "compare_and_delete",
            Self::CompareAndExpire { .. } => "compare_and_expire",
        }
    }

    /// Operations that may need a fragment that does not exist yet.
    pub fn creates_entry(&self) -> bool {
        matches!(
            self,
            Self::Put { .. } | Self::GetPut { .. } | Self::Incr { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Response {
    Done,
    Value(Bytes),
    Previous(Option<Bytes>),
    Counter(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_strictly_increase() {
        let mut last = next_version();
        for _ in 0..1000 {
            let next = next_version();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let entry = Entry {
            key: "k".into(),
            value: Bytes::from_static(b"v"),
            expires_at: Some(100),
            version: 1,
        };
        assert!(!entry.is_expired_at(99));
        assert!(entry.is_expired_at(100));
    }

    #[test]
    fn test_entry_decode_rejects_garbage() {
        assert!(matches!(Entry::decode(&[1, 2]), Err(DMapError::Codec(_))));
    }
}

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::DMapError;

/// Options accepted by `put`. At most one expiry option may be given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOption {
    /// Expire after a number of whole seconds.
    Ex(Duration),
    /// Expire after a number of milliseconds.
    Px(Duration),
    /// Expire at a point in time, second precision.
    ExAt(SystemTime),
    /// Expire at a point in time, millisecond precision.
    PxAt(SystemTime),
    /// Only write if no live entry exists.
    Nx,
    /// Only write if a live entry exists.
    Xx,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Condition {
    IfAbsent,
    IfPresent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Expiry {
    /// Milliseconds from the moment the primary applies the write.
    After(u64),
    /// Absolute unix milliseconds.
    At(u64),
}

/// Validated form of a `WriteOption` list.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PutOptions {
    pub condition: Option<Condition>,
    pub expiry: Option<Expiry>,
}

impl PutOptions {
    pub fn parse(options: &[WriteOption]) -> Result<Self, DMapError> {
        let mut parsed = PutOptions::default();

        for option in options {
            match option {
                WriteOption::Nx => parsed.set_condition(Condition::IfAbsent)?,
                WriteOption::Xx => parsed.set_condition(Condition::IfPresent)?,
                WriteOption::Ex(ttl) => {
                    let secs = ttl.as_secs();
                    if secs == 0 {
                        return Err(DMapError::invalid("EX must be at least one second"));
                    }
                    parsed.set_expiry(Expiry::After(secs.saturating_mul(1000)))?;
                }
                WriteOption::Px(ttl) => {
                    parsed.set_expiry(Expiry::After(ttl_millis(*ttl)?))?;
                }
                WriteOption::ExAt(at) => {
                    let secs = unix_duration(*at)?.as_secs();
                    parsed.set_expiry(Expiry::At(secs.saturating_mul(1000)))?;
                }
                WriteOption::PxAt(at) => {
                    let millis = unix_duration(*at)?.as_millis() as u64;
                    parsed.set_expiry(Expiry::At(millis))?;
                }
            }
        }

        Ok(parsed)
    }

    /// Absolute expiry for a write applied at `now`.
    pub fn expires_at(&self, now: u64) -> Option<u64> {
        self.expiry.map(|expiry| match expiry {
            Expiry::After(ms) => now.saturating_add(ms),
            Expiry::At(at) => at,
        })
    }

    fn set_condition(&mut self, condition: Condition) -> Result<(), DMapError> {
        match self.condition {
            Some(existing) if existing != condition => {
                Err(DMapError::invalid("NX and XX are mutually exclusive"))
            }
            _ => {
                self.condition = Some(condition);
                Ok(())
            }
        }
    }

    fn set_expiry(&mut self, expiry: Expiry) -> Result<(), DMapError> {
        if self.expiry.is_some() {
            return Err(DMapError::invalid(
                "only one of EX, PX, EXAT, PXAT may be given",
            ));
        }
        self.expiry = Some(expiry);
        Ok(())
    }
}

/// Relative TTL in milliseconds; anything below one millisecond is rejected.
pub fn ttl_millis(ttl: Duration) -> Result<u64, DMapError> {
    let millis = ttl.as_millis();
    if millis == 0 {
        return Err(DMapError::invalid("ttl must be at least one millisecond"));
    }
    Ok(millis.min(u64::MAX as u128) as u64)
}

fn unix_duration(at: SystemTime) -> Result<Duration, DMapError> {
    at.duration_since(UNIX_EPOCH)
        .map_err(|_| DMapError::invalid("expiry time is before the unix epoch"))
}

//! Pool sizing and eviction settings

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ualink_trust::options::duration_ms;

/// Pool sizing and eviction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Maximum number of pooled sessions
    pub capacity: usize,
    /// Unleased sessions idle this long are closed, zero disables
    #[serde(with = "duration_ms")]
    pub idle_timeout: Duration,
    /// Period of the background idle sweep
    #[serde(with = "duration_ms")]
    pub maintenance_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            idle_timeout: Duration::from_secs(300),
            maintenance_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Pool of `capacity` sessions with default eviction
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Change the idle timeout
    #[must_use]
    pub fn with_idle_timeout(self, idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            ..self
        }
    }

    pub(crate) fn effective_capacity(&self) -> usize {
        self.capacity.max(1)
    }

    pub(crate) fn idle_eviction_enabled(&self) -> bool {
        !self.idle_timeout.is_zero()
    }
}

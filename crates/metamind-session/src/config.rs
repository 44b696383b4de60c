//! Session layer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings for the update loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time between state updates. Default: 100 ms (10 updates/s).
    pub sync_interval: Duration,

    /// Consecutive failed ticks after which a session is ended.
    pub max_consecutive_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_millis(100),
            max_consecutive_failures: 3,
        }
    }
}

impl SessionConfig {
    /// Shortest accepted `sync_interval`.
    pub const MIN_SYNC_INTERVAL: Duration = Duration::from_millis(1);

    /// Returns a copy with out-of-range values clamped.
    pub fn validated(mut self) -> Self {
        if self.sync_interval < Self::MIN_SYNC_INTERVAL {
            warn!(
                requested_ms = self.sync_interval.as_secs_f64() * 1000.0,
                "sync_interval too small, clamping to 1 ms"
            );
            self.sync_interval = Self::MIN_SYNC_INTERVAL;
        }
        if self.max_consecutive_failures == 0 {
            warn!("max_consecutive_failures 0 is invalid, using 1");
            self.max_consecutive_failures = 1;
        }
        self
    }
}

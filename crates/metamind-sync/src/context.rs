//! Shared configuration and statistics for every synchronizer.
//!
//! There is exactly one [`SyncContext`] per server, created at startup
//! with [`init_sync_context`] and handed around as an `Arc`. It replaces
//! what would otherwise be a process-wide singleton.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::SyncStatistics;
use crate::compress::DEFAULT_COMPRESSION_THRESHOLD;

/// Default number of updates between forced full snapshots.
pub const DEFAULT_RESYNC_INTERVAL: u64 = 20;

// ---------------------------------------------------------------------------
// SyncConfig
// ---------------------------------------------------------------------------

/// Tunables for delta/full decisions and compression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Serialized size (bytes) at or above which payloads are compressed.
    pub compression_threshold: usize,

    /// Every Nth update to a client is a full snapshot. Bounds how long a
    /// client can stay out of sync after a lost delta.
    pub resync_interval: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            resync_interval: DEFAULT_RESYNC_INTERVAL,
        }
    }
}

impl SyncConfig {
    /// Returns a copy with out-of-range values clamped.
    pub fn validated(mut self) -> Self {
        if self.resync_interval == 0 {
            warn!("resync_interval 0 is invalid, using 1 (every update full)");
            self.resync_interval = 1;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// SyncContext
// ---------------------------------------------------------------------------

/// Configuration plus statistics shared by all synchronizers.
#[derive(Debug)]
pub struct SyncContext {
    config: SyncConfig,
    stats: Mutex<SyncStatistics>,
    shut_down: AtomicBool,
}

/// Creates the sync context for a server.
pub fn init_sync_context(config: SyncConfig) -> Arc<SyncContext> {
    let config = config.validated();
    info!(
        compression_threshold = config.compression_threshold,
        resync_interval = config.resync_interval,
        "sync context initialized"
    );
    Arc::new(SyncContext {
        config,
        stats: Mutex::new(SyncStatistics::default()),
        shut_down: AtomicBool::new(false),
    })
}

impl SyncContext {
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// A snapshot of the statistics with `compression_ratio` refreshed.
    pub fn statistics(&self) -> SyncStatistics {
        let mut stats = self.lock_stats();
        stats.refresh_ratio();
        stats.clone()
    }

    pub fn reset_statistics(&self) {
        *self.lock_stats() = SyncStatistics::default();
    }

    /// After this, every synchronizer built on the context refuses to
    /// prepare updates.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            info!("sync context shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub(crate) fn record(&self, f: impl FnOnce(&mut SyncStatistics)) {
        f(&mut self.lock_stats());
    }

    // Counters stay usable even if a holder panicked mid-update.
    fn lock_stats(&self) -> std::sync::MutexGuard<'_, SyncStatistics> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

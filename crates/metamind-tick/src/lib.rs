//! Fixed-interval tick scheduler for the MetaMind update loop.
//!
//! The session update loop wakes on a fixed cadence (100 ms by default),
//! pushes state to every subscribed client, and goes back to sleep. This
//! crate owns the "wake up on time" half of that: it sleeps without
//! spinning, detects late wake-ups, and watches how much of each interval
//! the update work consumes.
//!
//! # Integration
//!
//! ```ignore
//! let mut scheduler = TickScheduler::new(TickConfig::with_interval(interval));
//! loop {
//!     let tick = scheduler.wait_for_tick().await;
//!     manager.tick(tick.now);
//!     scheduler.record_tick_end();
//! }
//! ```

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the loop wakes up later than scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickPolicy {
    /// Forget the missed ticks and schedule the next one from now.
    #[default]
    Skip,
    /// Keep the original cadence. The next tick fires at its originally
    /// scheduled time, which may already be in the past.
    Drop,
}

/// Full configuration for the tick scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Overrun handling policy.
    pub policy: TickPolicy,
    /// Emit a warning when one tick's work exceeds this fraction of the
    /// interval. Default: 0.80.
    pub budget_warn_threshold: f64,
    /// Emit a critical warning above this fraction. Default: 1.0.
    pub budget_critical_threshold: f64,
    /// Track average/max tick time.
    pub metrics_enabled: bool,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
            budget_critical_threshold: 1.0,
            metrics_enabled: true,
        }
    }
}

impl TickConfig {
    /// Shortest interval the scheduler accepts.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

    /// Create a config for a specific interval with defaults elsewhere.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::new`]. Rules:
    /// - `interval` raised to at least [`Self::MIN_INTERVAL`].
    /// - Thresholds clamped to `0.0..=1.0`.
    /// - `budget_warn_threshold` forced ≤ `budget_critical_threshold`.
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_us = self.interval.as_micros() as u64,
                "tick interval below minimum, clamping to 1 ms"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self.budget_critical_threshold =
            self.budget_critical_threshold.clamp(0.0, 1.0);
        if self.budget_warn_threshold > self.budget_critical_threshold {
            self.budget_warn_threshold = self.budget_critical_threshold;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info
// ---------------------------------------------------------------------------

/// Information about a tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// When the scheduler woke up. Callers compute their own per-session
    /// elapsed time from this.
    pub now: TokioInstant,
    /// `true` if this tick fired more than 10% of an interval late.
    pub overrun: bool,
    /// Whole intervals skipped because of the overrun (Skip policy only).
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Runtime metrics for the tick scheduler.
///
/// Timing values refer to the work reported via
/// [`TickScheduler::record_tick_end`].
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Exponential moving average of tick work time (α = 0.1).
    pub avg_tick_time: Duration,
    pub max_tick_time: Duration,
    /// Fraction of the interval used by the last tick. >1.0 means overrun.
    pub budget_utilization: f64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-interval tick scheduler. One per update loop.
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    next_tick: TokioInstant,
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Create a new scheduler. The first tick fires one interval from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        debug!(
            interval_ms = config.interval.as_secs_f64() * 1000.0,
            policy = ?config.policy,
            "tick scheduler created"
        );
        Self {
            next_tick: TokioInstant::now() + config.interval,
            config,
            tick_count: 0,
            tick_start: None,
            metrics: TickMetrics::default(),
        }
    }

    /// Create a scheduler for an interval with default settings.
    pub fn with_interval(interval: Duration) -> Self {
        Self::new(TickConfig::with_interval(interval))
    }

    /// Sleep until the next tick is due and return its [`TickInfo`].
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let scheduled = self.next_tick;
        let interval = self.config.interval;

        time::sleep_until(scheduled).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(scheduled);
        let overrun = late_by > interval / 10;
        let mut ticks_skipped = 0u64;

        self.next_tick = match self.config.policy {
            TickPolicy::Skip => {
                if overrun {
                    ticks_skipped =
                        (late_by.as_nanos() / interval.as_nanos()) as u64;
                    if ticks_skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped = ticks_skipped,
                            late_ms = late_by.as_secs_f64() * 1000.0,
                            "update loop overrun, skipping ahead"
                        );
                    }
                }
                now + interval
            }
            TickPolicy::Drop => {
                if overrun {
                    warn!(
                        tick = self.tick_count,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "update loop overrun, keeping original cadence"
                    );
                }
                scheduled + interval
            }
        };

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            now,
            overrun,
            ticks_skipped,
        }
    }

    /// Record that the work for the current tick has finished.
    ///
    /// Enables budget warnings and timing metrics. A call without a
    /// preceding `wait_for_tick` is ignored.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let budget = self.config.interval;

        let utilization = elapsed.as_secs_f64() / budget.as_secs_f64();
        self.metrics.budget_utilization = utilization;

        if utilization >= self.config.budget_critical_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                "CRITICAL: update tick exceeded its interval"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = budget.as_secs_f64() * 1000.0,
                "update tick approaching its interval"
            );
        }

        if self.config.metrics_enabled {
            if elapsed > self.metrics.max_tick_time {
                self.metrics.max_tick_time = elapsed;
            }
            let alpha = 0.1;
            let prev = self.metrics.avg_tick_time.as_secs_f64();
            self.metrics.avg_tick_time = Duration::from_secs_f64(
                prev * (1.0 - alpha) + elapsed.as_secs_f64() * alpha,
            );
        }
    }

    /// Current tick count.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// The configured interval.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Snapshot of current metrics.
    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}

//! Integration tests for the fixed-interval tick scheduler.
//!
//! Uses `start_paused = true` so tokio's clock auto-advances whenever the
//! runtime is idle. `sleep_until` resolves instantly and `advance` lets a
//! test simulate a slow tick.

use std::time::Duration;

use metamind_tick::{TickConfig, TickPolicy, TickScheduler};

fn config_100ms() -> TickConfig {
    TickConfig::with_interval(Duration::from_millis(100))
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_uses_100ms_interval() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.interval, Duration::from_millis(100));
    assert_eq!(cfg.policy, TickPolicy::Skip);
}

#[test]
fn test_validated_clamps_zero_interval() {
    let cfg = TickConfig::with_interval(Duration::ZERO).validated();
    assert_eq!(cfg.interval, TickConfig::MIN_INTERVAL);
}

#[test]
fn test_validated_forces_warn_below_critical() {
    let cfg = TickConfig {
        budget_warn_threshold: 0.9,
        budget_critical_threshold: 0.5,
        ..config_100ms()
    }
    .validated();
    assert_eq!(cfg.budget_warn_threshold, 0.5);
    assert_eq!(cfg.budget_critical_threshold, 0.5);
}

#[test]
fn test_validated_clamps_thresholds_into_unit_range() {
    let cfg = TickConfig {
        budget_warn_threshold: -1.0,
        budget_critical_threshold: 7.0,
        ..config_100ms()
    }
    .validated();
    assert_eq!(cfg.budget_warn_threshold, 0.0);
    assert_eq!(cfg.budget_critical_threshold, 1.0);
}

// =========================================================================
// Tick firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_scheduler_initial_state() {
    let s = TickScheduler::new(config_100ms());
    assert_eq!(s.tick_count(), 0);
    assert_eq!(s.interval(), Duration::from_millis(100));
    assert_eq!(s.metrics().total_ticks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_after_one_interval() {
    let start = tokio::time::Instant::now();
    let mut s = TickScheduler::new(config_100ms());

    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert!(!info.overrun);
    assert_eq!(info.ticks_skipped, 0);
    assert_eq!(info.now.duration_since(start), Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_ticks_increment_monotonically() {
    let mut s = TickScheduler::with_interval(Duration::from_millis(100));

    for expected in 1..=5 {
        let info = s.wait_for_tick().await;
        assert_eq!(info.tick, expected);
    }
    assert_eq!(s.tick_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_ticks_are_one_interval_apart() {
    let mut s = TickScheduler::new(config_100ms());

    let first = s.wait_for_tick().await;
    let second = s.wait_for_tick().await;

    assert_eq!(
        second.now.duration_since(first.now),
        Duration::from_millis(100)
    );
}

// =========================================================================
// Overrun handling
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_skip_policy_reports_skipped_ticks_after_slow_tick() {
    let mut s = TickScheduler::new(config_100ms());

    s.wait_for_tick().await;
    // Simulate tick work that took 350 ms: the next deadline (t=200)
    // is missed by 250 ms.
    tokio::time::advance(Duration::from_millis(350)).await;

    let info = s.wait_for_tick().await;

    assert!(info.overrun);
    assert_eq!(info.ticks_skipped, 2);
    assert_eq!(s.metrics().total_overruns, 1);
    assert_eq!(s.metrics().total_skipped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_skip_policy_reschedules_from_now() {
    let mut s = TickScheduler::new(config_100ms());

    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(350)).await;
    let late = s.wait_for_tick().await;
    let next = s.wait_for_tick().await;

    assert_eq!(
        next.now.duration_since(late.now),
        Duration::from_millis(100)
    );
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_keeps_original_cadence() {
    let start = tokio::time::Instant::now();
    let mut s = TickScheduler::new(TickConfig {
        policy: TickPolicy::Drop,
        ..config_100ms()
    });

    s.wait_for_tick().await; // t = 100
    tokio::time::advance(Duration::from_millis(350)).await; // t = 450
    let late = s.wait_for_tick().await; // scheduled for 200

    assert!(late.overrun);
    assert_eq!(late.ticks_skipped, 0);

    // Next deadline is 300, already in the past: fires immediately.
    let next = s.wait_for_tick().await;
    assert_eq!(next.now.duration_since(start), Duration::from_millis(450));
}

// =========================================================================
// Metrics
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_without_wait_is_noop() {
    let mut s = TickScheduler::new(config_100ms());

    s.record_tick_end();

    assert_eq!(s.metrics().total_ticks, 0);
    assert_eq!(s.metrics().budget_utilization, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_max_tick_time_tracked() {
    let mut s = TickScheduler::new(config_100ms());

    // record_tick_end measures wall-clock time, which paused tokio time
    // doesn't affect, so burn a little real time.
    s.wait_for_tick().await;
    std::thread::sleep(Duration::from_micros(50));
    s.record_tick_end();

    assert!(s.metrics().max_tick_time > Duration::ZERO);
    assert!(s.metrics().budget_utilization > 0.0);
    assert!(s.metrics().budget_utilization < 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_disabled_skips_timing() {
    let mut s = TickScheduler::new(TickConfig {
        metrics_enabled: false,
        ..config_100ms()
    });

    s.wait_for_tick().await;
    std::thread::sleep(Duration::from_micros(50));
    s.record_tick_end();

    assert_eq!(s.metrics().total_ticks, 1);
    assert_eq!(s.metrics().avg_tick_time, Duration::ZERO);
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

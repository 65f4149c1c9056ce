//! Scheduler behavior under virtual time.

use std::time::Duration;

use netbridge_tick::{TickConfig, TickScheduler};

fn config_20hz() -> TickConfig {
    TickConfig {
        initial_jitter_us: 0,
        ..TickConfig::with_rate(20)
    }
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_polls_at_default_rate() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.tick_rate_hz, TickConfig::DEFAULT_TICK_RATE_HZ);
}

#[test]
fn test_tick_duration_20hz_is_50ms() {
    assert_eq!(
        TickConfig::with_rate(20).tick_duration(),
        Some(Duration::from_millis(50))
    );
}

#[test]
fn test_tick_duration_zero_rate_is_none() {
    assert_eq!(TickConfig::with_rate(0).tick_duration(), None);
}

#[test]
fn test_validated_clamps_rate_to_max() {
    let cfg = TickConfig::with_rate(1_000).validated();
    assert_eq!(cfg.tick_rate_hz, TickConfig::MAX_TICK_RATE_HZ);
}

#[test]
fn test_config_deserializes_with_missing_fields_defaulted() {
    let cfg: TickConfig = serde_json::from_str(r#"{"tick_rate_hz":10}"#).unwrap();
    assert_eq!(cfg.tick_rate_hz, 10);
    assert_eq!(cfg.initial_jitter_us, TickConfig::default().initial_jitter_us);
}

// =========================================================================
// Scheduler
// =========================================================================

#[test]
fn test_scheduler_initial_state() {
    let s = TickScheduler::new(config_20hz());
    assert_eq!(s.tick_count(), 0);
    assert_eq!(s.tick_rate_hz(), 20);
    assert!(!s.is_disabled());
    assert!(!s.is_paused());
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_and_increments() {
    let mut s = TickScheduler::new(config_20hz());

    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert_eq!(info.dt, Duration::from_millis(50));
    assert_eq!(info.ticks_skipped, 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_repeated_increments_monotonically() {
    let mut s = TickScheduler::new(config_20hz());

    for expected in 1..=5 {
        assert_eq!(s.wait_for_tick().await.tick, expected);
    }
    assert_eq!(s.tick_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_disabled_never_fires() {
    let mut s = TickScheduler::with_rate(0);
    assert!(s.is_disabled());

    let result = tokio::time::timeout(Duration::from_secs(5), s.wait_for_tick()).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_pause_prevents_ticks() {
    let mut s = TickScheduler::new(config_20hz());
    s.wait_for_tick().await;

    s.pause();

    let result = tokio::time::timeout(Duration::from_secs(1), s.wait_for_tick()).await;
    assert!(result.is_err());
    assert_eq!(s.tick_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_pause_ticks_again() {
    let mut s = TickScheduler::new(config_20hz());
    s.wait_for_tick().await;
    s.pause();
    s.pause();
    s.resume();
    s.resume();
    assert!(!s.is_paused());

    assert_eq!(s.wait_for_tick().await.tick, 2);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_late_wakeup_reports_skipped_ticks() {
    let mut s = TickScheduler::new(config_20hz());
    s.wait_for_tick().await;

    // Move the clock past several deadlines without polling the scheduler.
    tokio::time::advance(Duration::from_millis(175)).await;
    let info = s.wait_for_tick().await;

    assert_eq!(info.ticks_skipped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_after_late_wakeup_does_not_burst() {
    let mut s = TickScheduler::new(config_20hz());
    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(175)).await;
    s.wait_for_tick().await;

    // the next tick is a full interval after the late one
    let result = tokio::time::timeout(Duration::from_millis(40), s.wait_for_tick()).await;
    assert!(result.is_err());
    assert_eq!(s.wait_for_tick().await.tick, 3);
}

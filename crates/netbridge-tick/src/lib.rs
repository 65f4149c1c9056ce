//! Fixed-rate polling for Netbridge sessions.
//!
//! Backends such as the relay adapter only learn about new members and
//! queued packets when they are polled. [`UpdateLoop`] drives that polling
//! from a background task so the application does not have to call
//! [`SessionFacade::tick`] by hand.
//!
//! ```ignore
//! let facade = SessionFacade::default();
//! let updates = UpdateLoop::spawn(facade.clone(), TickConfig::with_rate(20));
//! // ... use the facade ...
//! updates.stop().await;
//! ```
//!
//! [`TickScheduler`] is also usable on its own inside a `tokio::select!`
//! loop when the caller already owns a task.

mod update_loop;

use std::time::Duration;

use netbridge_session::SessionFacade;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

pub use update_loop::UpdateLoop;

/// Something that wants to be polled at a fixed rate.
///
/// `tick` must not block: it is called from the update loop's task.
pub trait Tickable {
    fn tick(&self);
}

impl Tickable for SessionFacade {
    fn tick(&self) {
        SessionFacade::tick(self);
    }
}

impl<T: Tickable + ?Sized> Tickable for std::sync::Arc<T> {
    fn tick(&self) {
        (**self).tick();
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for [`TickScheduler`] and [`UpdateLoop`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Polls per second. 0 disables ticking entirely.
    pub tick_rate_hz: u32,
    /// Random delay (0..max µs) added to the first tick so that loops
    /// started together do not poll in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: Self::DEFAULT_TICK_RATE_HZ,
            initial_jitter_us: 2_000,
        }
    }
}

impl TickConfig {
    pub const DEFAULT_TICK_RATE_HZ: u32 = 30;
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Caps the rate at [`Self::MAX_TICK_RATE_HZ`].
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz exceeds maximum, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        self
    }

    /// Interval between ticks, or `None` when ticking is disabled.
    pub fn tick_duration(&self) -> Option<Duration> {
        if self.tick_rate_hz == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64))
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickInfo {
    /// Starts at 1.
    pub tick: u64,
    pub dt: Duration,
    /// Whole intervals that passed unpolled before this tick fired.
    pub ticks_skipped: u64,
}

/// Fixed-timestep scheduler.
#[derive(Debug)]
pub struct TickScheduler {
    config: TickConfig,
    tick_duration: Option<Duration>,
    tick_count: u64,
    next_tick: Option<Instant>,
    paused: bool,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();

        let next_tick = tick_duration.map(|interval| {
            let jitter = if config.initial_jitter_us > 0 {
                Duration::from_micros(rand::rng().random_range(0..config.initial_jitter_us))
            } else {
                Duration::ZERO
            };
            Instant::now() + interval + jitter
        });

        match tick_duration {
            Some(interval) => debug!(
                rate_hz = config.tick_rate_hz,
                interval_ms = interval.as_secs_f64() * 1000.0,
                "tick scheduler created"
            ),
            None => debug!("tick scheduler created with ticking disabled"),
        }

        Self {
            config,
            tick_duration,
            tick_count: 0,
            next_tick,
            paused: false,
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Waits until the next tick is due.
    ///
    /// Pends forever while paused or when ticking is disabled, so it is
    /// safe to use as one branch of a `tokio::select!`.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, interval) = match (self.next_tick, self.tick_duration) {
            (Some(next), Some(interval)) if !self.paused => (next, interval),
            _ => return std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;

        // A late wakeup never fires a burst; polling resumes from now.
        let late_by = now.saturating_duration_since(next);
        let ticks_skipped = (late_by.as_nanos() / interval.as_nanos()) as u64;
        if ticks_skipped > 0 {
            warn!(
                tick = self.tick_count,
                skipped = ticks_skipped,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "tick overrun, skipping ahead"
            );
        }
        self.next_tick = Some(now + interval);
        trace!(tick = self.tick_count, ticks_skipped, "tick fired");

        TickInfo {
            tick: self.tick_count,
            dt: interval,
            ticks_skipped,
        }
    }

    /// Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Restarts the cadence from now so the paused time is not made up.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            if let Some(interval) = self.tick_duration {
                self.next_tick = Some(Instant::now() + interval);
            }
            debug!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_disabled(&self) -> bool {
        self.tick_duration.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn tick_duration(&self) -> Option<Duration> {
        self.tick_duration
    }
}

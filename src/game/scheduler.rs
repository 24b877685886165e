//! Fixed-period tick timer for a running lobby

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::warn;

/// Fires once per period on the monotonic clock.
///
/// A step that overruns the period makes the next firing happen
/// immediately, after which the schedule re-aligns on the period. Missed
/// time is absorbed; there is never more than one step per firing.
#[derive(Debug)]
pub struct TickScheduler {
    interval: Interval,
    period: Duration,
}

impl TickScheduler {
    /// First firing is one full period from now
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next firing
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    /// Log a step that took longer than the period
    pub fn record_step(&self, tick: u64, took: Duration) -> bool {
        let overran = took > self.period;
        if overran {
            warn!(
                tick,
                took_ms = took.as_millis() as u64,
                period_ms = self.period.as_millis() as u64,
                "tick overran its period"
            );
        }
        overran
    }
}

use log::warn;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Delta-times above this are clamped so a stalled loop cannot launch an avatar
pub const MAX_FRAME_DT: Duration = Duration::from_millis(50);

/// Paces a loop to a fixed rate and reports the measured delta-time.
#[derive(Debug)]
pub struct Pacer {
    interval: Interval,
    last_tick: Instant,
    period: Duration,
}

impl Pacer {
    pub fn new(rate_hz: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / f64::from(rate_hz.max(1)));
        let now = Instant::now();
        let mut interval = interval_at(now + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Self {
            interval,
            last_tick: now,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next tick and returns seconds elapsed since the last one.
    pub async fn tick(&mut self) -> f64 {
        self.interval.tick().await;
        // a skipped tick reports its missed deadline, so measure wall time
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        if elapsed > MAX_FRAME_DT {
            warn!(
                "Loop fell behind: {:.1} ms since last tick, capping to {} ms",
                elapsed.as_secs_f64() * 1000.0,
                MAX_FRAME_DT.as_millis()
            );
            return MAX_FRAME_DT.as_secs_f64();
        }
        elapsed.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[tokio::test(start_paused = true)]
    async fn test_tick_reports_period() {
        let mut pacer = Pacer::new(50);
        assert_eq!(pacer.period(), Duration::from_millis(20));

        let dt = pacer.tick().await;
        assert_approx_eq!(dt, 0.02, 1e-6);
        let dt = pacer.tick().await;
        assert_approx_eq!(dt, 0.02, 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_is_capped() {
        let mut pacer = Pacer::new(100);
        pacer.tick().await;

        tokio::time::sleep(Duration::from_millis(400)).await;
        let dt = pacer.tick().await;
        assert_approx_eq!(dt, MAX_FRAME_DT.as_secs_f64(), 1e-9);
    }
}

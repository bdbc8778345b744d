use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_SYNC_THROTTLE: Duration = Duration::from_millis(200);

/// Rate limiter for outbound delta broadcasts.
///
/// Purely a performance knob: receivers converge through final-wins merging
/// no matter which intermediate events are dropped here.
#[derive(Debug, Clone)]
pub struct BroadcastThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl BroadcastThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true and records `now` when an event may go out.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let ready = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if ready {
            self.last_emit = Some(now);
        }
        ready
    }

    /// Forget the last emission so the next event passes unconditionally.
    pub fn reset(&mut self) {
        self.last_emit = None;
    }
}

impl Default for BroadcastThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_THROTTLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_event_always_passes() {
        let mut throttle = BroadcastThrottle::default();
        assert!(throttle.try_acquire(Instant::now()));
    }

    #[test]
    fn events_inside_window_are_dropped() {
        let mut throttle = BroadcastThrottle::new(Duration::from_millis(200));
        let start = Instant::now();
        assert!(throttle.try_acquire(start));
        assert!(!throttle.try_acquire(start + Duration::from_millis(50)));
        assert!(!throttle.try_acquire(start + Duration::from_millis(199)));
        assert!(throttle.try_acquire(start + Duration::from_millis(200)));
        assert!(!throttle.try_acquire(start + Duration::from_millis(250)));
    }

    #[test]
    fn reset_reopens_the_window() {
        let mut throttle = BroadcastThrottle::new(Duration::from_secs(10));
        let start = Instant::now();
        assert!(throttle.try_acquire(start));
        throttle.reset();
        assert!(throttle.try_acquire(start + Duration::from_millis(1)));
    }

    #[test]
    fn zero_interval_never_throttles() {
        let mut throttle = BroadcastThrottle::new(Duration::ZERO);
        let now = Instant::now();
        assert!(throttle.try_acquire(now));
        assert!(throttle.try_acquire(now));
    }
}

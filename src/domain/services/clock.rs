use crate::domain::value_objects::timestamps::Timestamp;
use std::sync::Mutex;
use time::Duration;

/// Source of "now" for stores that do not own a clock of their own.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now_utc()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = now.plus(delta);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_manual_clock_when_advanced_should_move_forward_by_delta() {
        let start = Timestamp::now_utc();
        let clock = ManualClock::new(start);

        clock.advance(Duration::seconds(90));

        assert_eq!(clock.now(), start.plus(Duration::seconds(90)));
    }

    #[test]
    fn given_manual_clock_when_not_advanced_should_stay_put() {
        let start = Timestamp::now_utc();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), start);
    }
}

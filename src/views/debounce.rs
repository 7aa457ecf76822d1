//! Idle-time debounce driven by the event loop tick.

use std::time::{Duration, Instant};

/// Fires once `delay` has passed since the last `touch_at`.
///
/// Each touch restarts the timer. Firing never cancels work already started,
/// it only decides when the next piece of work begins.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Debounce { delay, deadline: None }
    }

    pub fn touch_at(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    /// True exactly once per quiet period, on the first tick past the deadline.
    pub fn fire_at(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_touch_restarts_timer() {
        let start = Instant::now();
        let mut debounce = Debounce::new(Duration::from_millis(500));
        debounce.touch_at(start);
        debounce.touch_at(start + Duration::from_millis(300));
        assert!(!debounce.fire_at(start + Duration::from_millis(600)));
        assert!(debounce.fire_at(start + Duration::from_millis(800)));
        assert!(!debounce.fire_at(start + Duration::from_millis(900)));
    }
}

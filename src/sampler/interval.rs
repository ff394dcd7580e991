use std::time::{Duration, Instant};

/// A fixed cadence schedule for the sampling loop.
pub struct Interval {
    next: Instant,
    period: Duration,
}

impl Interval {
    pub fn new(start: Instant, period: Duration) -> Self {
        Self {
            next: start,
            period,
        }
    }

    /// Advances the schedule past the tick that just ran at `now` and returns
    /// the deadline of the next tick.
    pub fn advance(&mut self, now: Instant) -> Instant {
        let next = self.next + self.period;

        // check if we have fallen behind
        if next > now {
            self.next = next;
        } else {
            // if we fell behind, don't sample again until the interval has
            // elapsed
            self.next = now + self.period;
        }

        self.next
    }

    /// Parks the calling thread until `deadline` or until `cancelled` returns
    /// true. Returns false if the wait was cancelled.
    pub fn wait_until(deadline: Instant, cancelled: impl Fn() -> bool) -> bool {
        loop {
            if cancelled() {
                return false;
            }

            let now = Instant::now();

            if now >= deadline {
                return true;
            }

            std::thread::park_timeout(deadline - now);
        }
    }
}

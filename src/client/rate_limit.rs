//! Client-side operation rate limiting.
//!
//! Windowed counters per operation class. When a window's budget is
//! spent, calls fail with `RateLimited` carrying the time until the
//! window rolls over; counters can be reset or reconfigured at runtime.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(limit: u32, window_ms: u64) -> Self {
        Self {
            limit,
            window: Duration::from_millis(window_ms),
        }
    }
}

/// Limits for the three metered operation classes. `None` disables the
/// meter for that class.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimits {
    pub subscribe: Option<RateLimit>,
    pub publish: Option<RateLimit>,
    pub fetch: Option<RateLimit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Subscribe,
    Publish,
    Fetch,
}

struct Meter {
    limit: Option<RateLimit>,
    window_started: Instant,
    count: u32,
}

impl Meter {
    fn new(limit: Option<RateLimit>) -> Self {
        Self {
            limit,
            window_started: Instant::now(),
            count: 0,
        }
    }

    fn check(&mut self) -> Result<()> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        let now = Instant::now();
        if now.duration_since(self.window_started) >= limit.window {
            self.window_started = now;
            self.count = 0;
        }
        if self.count >= limit.limit {
            let elapsed = now.duration_since(self.window_started);
            let retry_after = limit.window.saturating_sub(elapsed);
            return Err(Error::RateLimited {
                retry_after_ms: retry_after.as_millis() as u64,
            });
        }
        self.count += 1;
        Ok(())
    }

    fn reset(&mut self) {
        self.window_started = Instant::now();
        self.count = 0;
    }
}

pub struct RateLimiter {
    subscribe: Mutex<Meter>,
    publish: Mutex<Meter>,
    fetch: Mutex<Meter>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            subscribe: Mutex::new(Meter::new(limits.subscribe)),
            publish: Mutex::new(Meter::new(limits.publish)),
            fetch: Mutex::new(Meter::new(limits.fetch)),
        }
    }

    fn meter(&self, op: Operation) -> &Mutex<Meter> {
        match op {
            Operation::Subscribe => &self.subscribe,
            Operation::Publish => &self.publish,
            Operation::Fetch => &self.fetch,
        }
    }

    /// Consume one unit of budget, or fail with `RateLimited`.
    pub fn check(&self, op: Operation) -> Result<()> {
        self.meter(op).lock().unwrap().check()
    }

    /// Replace a limit; also restarts that window.
    pub fn configure(&self, op: Operation, limit: Option<RateLimit>) {
        let mut meter = self.meter(op).lock().unwrap();
        meter.limit = limit;
        meter.reset();
    }

    pub fn reset(&self, op: Operation) {
        self.meter(op).lock().unwrap().reset();
    }

    pub fn reset_all(&self) {
        for op in [Operation::Subscribe, Operation::Publish, Operation::Fetch] {
            self.reset(op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_enforced_per_window() {
        let limiter = RateLimiter::new(RateLimits {
            subscribe: Some(RateLimit::new(1, 60_000)),
            ..Default::default()
        });

        limiter.check(Operation::Subscribe).unwrap();
        let err = limiter.check(Operation::Subscribe).unwrap_err();
        match err {
            Error::RateLimited { retry_after_ms } => assert!(retry_after_ms <= 60_000),
            other => panic!("unexpected error {other}"),
        }

        // Other operation classes are unmetered here.
        limiter.check(Operation::Publish).unwrap();
        limiter.check(Operation::Fetch).unwrap();
    }

    #[test]
    fn window_rolls_over() {
        let limiter = RateLimiter::new(RateLimits {
            publish: Some(RateLimit::new(1, 1)),
            ..Default::default()
        });
        limiter.check(Operation::Publish).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        limiter.check(Operation::Publish).unwrap();
    }

    #[test]
    fn reset_restores_budget() {
        let limiter = RateLimiter::new(RateLimits {
            fetch: Some(RateLimit::new(1, 60_000)),
            ..Default::default()
        });
        limiter.check(Operation::Fetch).unwrap();
        assert!(limiter.check(Operation::Fetch).is_err());
        limiter.reset(Operation::Fetch);
        limiter.check(Operation::Fetch).unwrap();
    }

    #[test]
    fn reconfigure_at_runtime() {
        let limiter = RateLimiter::new(RateLimits::default());
        limiter.check(Operation::Subscribe).unwrap();
        limiter.configure(Operation::Subscribe, Some(RateLimit::new(0, 60_000)));
        assert!(limiter.check(Operation::Subscribe).is_err());
        limiter.configure(Operation::Subscribe, None);
        limiter.check(Operation::Subscribe).unwrap();
    }
}

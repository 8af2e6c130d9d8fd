//! Fixed-window rate limiter for outbound API calls
//!
//! `before()` returns `0` when a call may proceed immediately, otherwise the
//! clock timestamp (milliseconds) at which the current window rolls over.
//! Rejected checks do not consume budget; callers wait and check again.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Monotonic millisecond clock
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> u64;
}

/// Clock backed by the tokio timer, so paused test time applies
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Clock moved by hand
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Window {
    start: Option<u64>,
    count: u32,
}

/// Caps calls to `capacity` per `window`
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window_ms: u64,
    clock: Arc<dyn Clock>,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(capacity: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity,
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1),
            clock,
            state: Mutex::new(Window::default()),
        }
    }

    /// Limiter on the tokio clock
    pub fn with_system_clock(capacity: u32, window: Duration) -> Self {
        Self::new(capacity, window, Arc::new(SystemClock::new()))
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Permission check: `0` to proceed, or the time to wait until
    pub fn before(&self) -> u64 {
        let now = self.clock.now_millis();
        let mut window = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let expired = match window.start {
            None => true,
            Some(start) => now >= start.saturating_add(self.window_ms),
        };
        if expired {
            window.start = Some(now);
            window.count = 0;
        }

        if window.count < self.capacity {
            window.count += 1;
            0
        } else {
            window.start.unwrap_or(now).saturating_add(self.window_ms)
        }
    }

    /// Wait until a call is allowed
    pub async fn acquire(&self) {
        loop {
            let until = self.before();
            if until == 0 {
                return;
            }
            let now = self.clock.now_millis();
            let wait = until.saturating_sub(now).max(1);
            tracing::debug!(wait_ms = wait, "rate limit reached, waiting for next window");
            tokio::time::sleep(Duration::from_millis(wait)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, window_ms: u64) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(10_000));
        let limiter = RateLimiter::new(capacity, Duration::from_millis(window_ms), clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_capacity_three_per_second() {
        let (clock, limiter) = limiter(3, 1000);

        for _ in 0..3 {
            assert_eq!(limiter.before(), 0);
        }
        assert_eq!(limiter.before(), 11_000);
        assert_eq!(limiter.before(), 11_000, "rejections do not consume budget");

        clock.set(11_000);
        for _ in 0..3 {
            assert_eq!(limiter.before(), 0);
        }
        assert_eq!(limiter.before(), 12_000);
    }

    #[test]
    fn test_window_resets_only_after_expiry() {
        let (clock, limiter) = limiter(2, 500);
        assert_eq!(limiter.before(), 0);
        clock.advance(499);
        assert_eq!(limiter.before(), 0);
        assert_eq!(limiter.before(), 10_500);
        clock.advance(1);
        assert_eq!(limiter.before(), 0);
    }

    #[test]
    fn test_various_capacities() {
        for capacity in [1u32, 5, 50] {
            let (clock, limiter) = limiter(capacity, 200);
            for _ in 0..capacity {
                assert_eq!(limiter.before(), 0);
            }
            let until = limiter.before();
            assert!(until >= 10_000 + 200);
            clock.set(until);
            for _ in 0..capacity {
                assert_eq!(limiter.before(), 0);
            }
        }
    }

    #[test]
    fn test_concurrent_callers_share_budget() {
        let (_clock, limiter) = limiter(100, 1000);
        let limiter = Arc::new(limiter);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..50).filter(|_| limiter.before() == 0).count())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_next_window() {
        let limiter = RateLimiter::with_system_clock(2, Duration::from_secs(1));
        let start = tokio::time::Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }
}

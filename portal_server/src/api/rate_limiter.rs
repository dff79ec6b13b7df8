//! Login attempt limiting.
//!
//! Failed logins are counted per normalized email in a sliding window; a
//! successful login clears the window for that email.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Sliding window of recent attempts
#[derive(Debug)]
pub struct SlidingWindow {
    /// Timestamps of recent attempts
    timestamps: VecDeque<Instant>,
    /// Maximum number of attempts allowed in the window
    max_requests: usize,
    /// Window length
    window: Duration,
}

impl SlidingWindow {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(max_requests),
            max_requests,
            window,
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(ts) = self.timestamps.front() {
            if now.duration_since(*ts) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Whether another attempt fits in the window. Does not record it.
    pub fn allows(&mut self) -> bool {
        self.evict(Instant::now());
        self.timestamps.len() < self.max_requests
    }

    pub fn record(&mut self) {
        let now = Instant::now();
        self.evict(now);
        self.timestamps.push_back(now);
    }

    pub fn remaining(&self) -> usize {
        self.max_requests.saturating_sub(self.timestamps.len())
    }

    /// Time until the oldest attempt leaves the window.
    pub fn reset_in(&self) -> Option<Duration> {
        self.timestamps.front().map(|oldest| {
            let elapsed = Instant::now().duration_since(*oldest);
            self.window.saturating_sub(elapsed)
        })
    }

    fn is_idle(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Per-email failed-login limiter shared by all handlers.
#[derive(Debug)]
pub struct LoginRateLimiter {
    windows: Mutex<HashMap<String, SlidingWindow>>,
    max_attempts: usize,
    window: Duration,
}

impl LoginRateLimiter {
    /// # Example
    ///
    /// ```
    /// use portal_server::api::rate_limiter::LoginRateLimiter;
    /// use std::time::Duration;
    ///
    /// let limiter = LoginRateLimiter::new(2, Duration::from_secs(300));
    /// limiter.record_failure("ana@portal.test");
    /// limiter.record_failure("ANA@portal.test");
    /// assert!(!limiter.check("ana@portal.test"));
    /// assert!(limiter.check("bo@portal.test"));
    /// ```
    pub fn new(max_attempts: usize, window: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_attempts,
            window,
        }
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, SlidingWindow>> {
        self.windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn key(email: &str) -> String {
        email.trim().to_lowercase()
    }

    /// Whether a login for `email` may be attempted now.
    pub fn check(&self, email: &str) -> bool {
        self.windows()
            .get_mut(&Self::key(email))
            .is_none_or(SlidingWindow::allows)
    }

    pub fn record_failure(&self, email: &str) {
        let (max, window) = (self.max_attempts, self.window);
        self.windows()
            .entry(Self::key(email))
            .or_insert_with(|| SlidingWindow::new(max, window))
            .record();
    }

    pub fn record_success(&self, email: &str) {
        self.windows().remove(&Self::key(email));
    }

    /// Attempts left for `email` in the current window.
    pub fn remaining(&self, email: &str) -> usize {
        self.windows()
            .get(&Self::key(email))
            .map_or(self.max_attempts, SlidingWindow::remaining)
    }

    /// Drop windows with no attempts left in them.
    pub fn prune(&self) -> usize {
        let mut windows = self.windows();
        let before = windows.len();
        windows.retain(|_, w| {
            w.evict(Instant::now());
            !w.is_idle()
        });
        before - windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_window_blocks_over_limit() {
        let mut window = SlidingWindow::new(3, Duration::from_secs(1));
        for _ in 0..3 {
            assert!(window.allows());
            window.record();
        }
        assert!(!window.allows(), "Should block attempt over limit");
        assert_eq!(window.remaining(), 0);
    }

    #[test]
    fn test_window_expiry() {
        let mut window = SlidingWindow::new(2, Duration::from_millis(100));
        window.record();
        window.record();
        assert!(!window.allows());

        thread::sleep(Duration::from_millis(150));

        assert!(window.allows(), "Should allow after window expires");
    }

    #[test]
    fn test_reset_in() {
        let mut window = SlidingWindow::new(5, Duration::from_secs(1));
        assert!(window.reset_in().is_none());
        window.record();
        assert!(window.reset_in().unwrap() <= Duration::from_secs(1));
    }

    #[test]
    fn test_limiter_is_per_email() {
        let limiter = LoginRateLimiter::new(2, Duration::from_secs(60));
        limiter.record_failure("ana@portal.test");
        assert_eq!(limiter.remaining("ana@portal.test"), 1);
        limiter.record_failure(" Ana@Portal.test ");

        assert!(!limiter.check("ana@portal.test"));
        assert!(limiter.check("bo@portal.test"));
        assert_eq!(limiter.remaining("bo@portal.test"), 2);
    }

    #[test]
    fn test_success_clears_failures() {
        let limiter = LoginRateLimiter::new(1, Duration::from_secs(60));
        limiter.record_failure("ana@portal.test");
        assert!(!limiter.check("ana@portal.test"));

        limiter.record_success("ana@portal.test");
        assert!(limiter.check("ana@portal.test"));
    }

    #[test]
    fn test_prune_drops_idle_windows() {
        let limiter = LoginRateLimiter::new(3, Duration::from_millis(50));
        limiter.record_failure("ana@portal.test");
        limiter.record_failure("bo@portal.test");
        assert_eq!(limiter.prune(), 0);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(limiter.prune(), 2);
    }
}

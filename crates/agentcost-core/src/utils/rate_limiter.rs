//! Rate limiting for outgoing requests
//!
//! Sliding-window limiter: at most `max_requests` acquisitions in any
//! `window`. Callers over the limit wait until the oldest request leaves the
//! window instead of being rejected.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window for rate limiting
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_second(crate::config::DEFAULT_MAX_REQUESTS_PER_SECOND)
    }
}

impl RateLimitConfig {
    /// Create a new rate limit config
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Create config for requests per second
    #[must_use]
    pub fn per_second(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }
}

/// In-memory sliding window limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    requests: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter. `max_requests == 0` disables limiting.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a request is allowed, then record it
    pub async fn acquire(&self) {
        if self.config.max_requests == 0 {
            return;
        }

        loop {
            let wait = {
                let mut requests = self.requests.lock().await;
                let now = Instant::now();
                while requests
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.config.window)
                {
                    requests.pop_front();
                }

                if requests.len() < self.config.max_requests as usize {
                    requests.push_back(now);
                    return;
                }

                match requests.front() {
                    Some(oldest) => self
                        .config
                        .window
                        .saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            tokio::time::sleep(wait).await;
        }
    }

    /// Requests recorded in the current window
    pub async fn current(&self) -> usize {
        let requests = self.requests.lock().await;
        let now = Instant::now();
        requests
            .iter()
            .filter(|t| now.duration_since(**t) < self.config.window)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_allows_up_to_limit_without_waiting() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(3));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.current().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_window_to_slide() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(2));
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_disables_limit() {
        let limiter = RateLimiter::new(RateLimitConfig::per_second(0));
        let start = Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}

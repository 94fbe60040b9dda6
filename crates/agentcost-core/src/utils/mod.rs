//! Utility modules for agentcost-core
//!
//! Provides common utilities:
//! - retry: Retry logic with exponential backoff
//! - rate_limiter: Sliding-window send throttle

mod rate_limiter;
mod retry;

pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retry::{retry_with_backoff, RetryConfig, RetryError, Retryable};

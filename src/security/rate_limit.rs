//! Token-bucket rate limiting for recursive model calls
//!
//! Agent code can call `llm_query` in a loop. Each call costs a model
//! completion, so the host optionally caps them with a process-wide bucket.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  ┌─────────────┐                                                 │
//! │  │   Bucket    │ ← Holds tokens (max = capacity)                │
//! │  │  ● ● ● ●    │ ← Tokens refill at rate R per second           │
//! │  └─────────────┘                                                 │
//! │        │                                                         │
//! │        ▼                                                         │
//! │  llm_query arrives:                                              │
//! │    - If token available → consume 1 token, call the model       │
//! │    - If bucket empty → RateLimitError raised in the agent code  │
//! └───────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Thread-safe token bucket.
pub struct RateLimiter {
    /// Maximum tokens in bucket (burst capacity)
    capacity: u64,

    /// Tokens added per second
    refill_rate: f64,

    /// Current token count, scaled by [`SCALE`]
    tokens_scaled: AtomicU64,

    last_refill: Mutex<Instant>,
}

// Tokens are stored * 1000 so fractional refills accumulate
const SCALE: u64 = 1000;

impl RateLimiter {
    /// `capacity` burst, then `refill_rate` calls per second sustained.
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens_scaled: AtomicU64::new(capacity * SCALE),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// Consume one token, or fail with the time until the next one.
    pub fn try_acquire(&self) -> Result<(), RateLimitError> {
        self.refill();

        loop {
            let current = self.tokens_scaled.load(Ordering::Relaxed);
            if current < SCALE {
                return Err(RateLimitError::new(self.refill_rate));
            }
            if self
                .tokens_scaled
                .compare_exchange(current, current - SCALE, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    fn refill(&self) {
        let now = Instant::now();
        let mut last = self
            .last_refill
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed = now.duration_since(*last);

        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate * SCALE as f64) as u64;
        if tokens_to_add == 0 {
            return;
        }
        *last = now;

        let max_scaled = self.capacity * SCALE;
        loop {
            let current = self.tokens_scaled.load(Ordering::Relaxed);
            let new = std::cmp::min(current.saturating_add(tokens_to_add), max_scaled);
            if self
                .tokens_scaled
                .compare_exchange(current, new, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }
}

/// A call was refused because the bucket is empty.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("sub-model call rate exceeded, retry after {retry_after:?}")]
pub struct RateLimitError {
    pub retry_after: Duration,
}

impl RateLimitError {
    /// Time to earn one token at `refill_rate`; one second when nothing
    /// refills, saturating when the wait does not fit a `Duration`.
    pub fn new(refill_rate: f64) -> Self {
        let retry_secs = if refill_rate > 0.0 {
            1.0 / refill_rate
        } else {
            1.0
        };
        Self {
            retry_after: Duration::try_from_secs_f64(retry_secs).unwrap_or(Duration::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_denied() {
        let limiter = RateLimiter::new(3, 1.0);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());

        let err = limiter.try_acquire().unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(1));
    }

    #[test]
    fn test_refill() {
        let limiter = RateLimiter::new(2, 100.0);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());

        // 10ms = 1 token at 100/sec
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.try_acquire().is_ok());
    }

    #[test]
    fn test_zero_rate_never_refills() {
        let limiter = RateLimiter::new(1, 0.0);
        assert!(limiter.try_acquire().is_ok());
        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.try_acquire().is_err());
    }

    #[test]
    fn test_tiny_rate_saturates_retry_after() {
        let limiter = RateLimiter::new(1, 1e-30);
        assert!(limiter.try_acquire().is_ok());
        let err = limiter.try_acquire().unwrap_err();
        assert_eq!(err.retry_after, Duration::MAX);
        assert!(err.to_string().starts_with("sub-model call rate exceeded"));
    }
}

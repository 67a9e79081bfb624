//! Per-key token bucket rate limiting (spec §4.2, §5: "allowed to diverge
//! across replicas" rules out a shared/distributed limiter, so a
//! per-process `tokio::sync::Mutex<HashMap<...>>` is the right shape).

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket keyed by an arbitrary string (client IP for the
/// gateway's global limiter, transaction-endpoint-specific key for the
/// stricter money-movement limiter in spec §4.5).
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_second: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    #[must_use]
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_per_second,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Attempts to take one token for `key`, refilling lazily based on
    /// elapsed time since the bucket was last touched. Returns `true` if
    /// the request may proceed.
    pub async fn try_acquire(&self, key: &str) -> bool {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let bucket = guard.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_second).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Default gateway-wide limit: generous, per spec §4.5 the money-movement
/// endpoints sit behind a *stricter* limiter layered on top of this one.
#[must_use]
pub fn global_limiter() -> TokenBucketLimiter {
    TokenBucketLimiter::new(120, 60.0 / 60.0 * 2.0)
}

/// Strict per-IP limiter for money-movement endpoints (spec §4.5: "a
/// strict per-IP token bucket, lower than the gateway's general limit").
#[must_use]
pub fn money_movement_limiter() -> TokenBucketLimiter {
    TokenBucketLimiter::new(10, 10.0 / 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exhausts_then_refills_over_time() {
        let limiter = TokenBucketLimiter::new(2, 100.0);
        assert!(limiter.try_acquire("ip-1").await);
        assert!(limiter.try_acquire("ip-1").await);
        assert!(!limiter.try_acquire("ip-1").await);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(limiter.try_acquire("ip-1").await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = TokenBucketLimiter::new(1, 0.0);
        assert!(limiter.try_acquire("ip-1").await);
        assert!(limiter.try_acquire("ip-2").await);
        assert!(!limiter.try_acquire("ip-1").await);
    }
}

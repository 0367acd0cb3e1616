use std::sync::Mutex;

use tokio::time::Instant;

/// Token-bucket rate limiter, one per provider.
///
/// The bucket holds up to `burst` tokens and refills at the provider's
/// daily quota spread evenly over the day. An empty bucket skips the
/// provider for this investigation rather than queueing.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// `requests_per_day` spread evenly, with up to `burst` immediate calls.
    #[must_use]
    pub fn new(requests_per_day: u32, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        Self {
            capacity,
            refill_per_sec: f64::from(requests_per_day) / 86_400.0,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn burst_then_empty() {
        let bucket = TokenBucket::new(1000, 3);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire(), "burst exhausted");
    }

    #[tokio::test(start_paused = true)]
    async fn refills_over_time() {
        // 86400 requests/day refills one token per second.
        let bucket = TokenBucket::new(86_400, 1);
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.try_acquire(), "one token per second at this quota");
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_burst() {
        let bucket = TokenBucket::new(86_400, 2);
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire(), "capacity capped at burst");
    }
}

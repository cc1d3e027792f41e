//! Immutable token bucket.
//!
//! `try_take` never mutates: it returns the granted token count together
//! with the successor bucket, and the caller swaps the value in. Keeping the
//! bucket a plain value keeps every admission decision replayable in tests.

/// A token bucket refilled at a fixed interval, represented as a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    capacity: u64,
    refill_amount: u64,
    refill_interval_ms: u64,
    tokens: u64,
    last_refill_at: i64,
}

impl TokenBucket {
    /// Creates a full bucket. `now` anchors the refill schedule.
    pub fn new(capacity: u64, refill_amount: u64, refill_interval_ms: u64, now: i64) -> Self {
        Self {
            capacity,
            refill_amount,
            refill_interval_ms,
            tokens: capacity,
            last_refill_at: now,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Tokens that would be available at `now`, after refill.
    pub fn tokens_at(&self, now: i64) -> u64 {
        let (tokens, _) = self.refilled(now);
        tokens
    }

    /// Takes between `min` and `max` tokens, as many as are available.
    ///
    /// Returns `None` when fewer than `min` tokens are available; otherwise
    /// the granted count and the bucket to use from now on.
    pub fn try_take(&self, min: u64, max: u64, now: i64) -> Option<(u64, TokenBucket)> {
        debug_assert!(min >= 1 && min <= max);
        let (available, last_refill_at) = self.refilled(now);
        if available < min {
            return None;
        }
        let granted = available.min(max);
        let next = TokenBucket {
            tokens: available - granted,
            last_refill_at,
            ..*self
        };
        Some((granted, next))
    }

    fn refilled(&self, now: i64) -> (u64, i64) {
        let elapsed = now.saturating_sub(self.last_refill_at);
        if elapsed < self.refill_interval_ms as i64 {
            return (self.tokens, self.last_refill_at);
        }
        let intervals = elapsed as u64 / self.refill_interval_ms;
        let refill = intervals.saturating_mul(self.refill_amount);
        let tokens = self.tokens.saturating_add(refill).min(self.capacity);
        // Advance by whole intervals only, so partial intervals carry over.
        let last_refill_at = self.last_refill_at + (intervals * self.refill_interval_ms) as i64;
        (tokens, last_refill_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full() {
        let bucket = TokenBucket::new(50, 2, 1_000, 0);
        assert_eq!(bucket.tokens_at(0), 50);
    }

    #[test]
    fn grants_up_to_max() {
        let bucket = TokenBucket::new(50, 2, 1_000, 0);
        let (granted, next) = bucket.try_take(1, 10, 0).expect("tokens available");
        assert_eq!(granted, 10);
        assert_eq!(next.tokens_at(0), 40);
    }

    #[test]
    fn grants_less_than_max_when_drained() {
        let bucket = TokenBucket::new(50, 2, 1_000, 0);
        let (_, bucket) = bucket.try_take(1, 47, 0).unwrap();
        let (granted, bucket) = bucket.try_take(1, 10, 0).unwrap();
        assert_eq!(granted, 3);
        assert_eq!(bucket.tokens_at(0), 0);
    }

    #[test]
    fn refuses_below_min() {
        let bucket = TokenBucket::new(50, 2, 1_000, 0);
        let (_, bucket) = bucket.try_take(1, 50, 0).unwrap();
        assert!(bucket.try_take(1, 5, 0).is_none());
    }

    #[test]
    fn refills_at_fixed_interval() {
        let bucket = TokenBucket::new(50, 2, 1_000, 0);
        let (_, bucket) = bucket.try_take(1, 50, 0).unwrap();
        assert_eq!(bucket.tokens_at(999), 0);
        assert_eq!(bucket.tokens_at(1_000), 2);
        assert_eq!(bucket.tokens_at(3_500), 6);
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(50, 2, 1_000, 0);
        let (_, bucket) = bucket.try_take(1, 10, 0).unwrap();
        assert_eq!(bucket.tokens_at(3_600_000), 50);
    }

    #[test]
    fn partial_intervals_carry_over() {
        let bucket = TokenBucket::new(50, 2, 1_000, 0);
        let (_, bucket) = bucket.try_take(1, 50, 0).unwrap();
        // 1.5 intervals later only one refill has happened; the half
        // interval is not lost.
        let (granted, bucket) = bucket.try_take(1, 10, 1_500).unwrap();
        assert_eq!(granted, 2);
        assert_eq!(bucket.tokens_at(2_000), 2);
    }

    #[test]
    fn original_bucket_is_untouched() {
        let bucket = TokenBucket::new(50, 2, 1_000, 0);
        let _ = bucket.try_take(1, 50, 0);
        assert_eq!(bucket.tokens_at(0), 50);
    }
}

//! The token bucket as a pure function over `(tokens, last_refill, now)`.
//!
//! Keeping the arithmetic here, free of any store, pins the semantics: the
//! Redis script mirrors this function line for line, and the unit tests
//! below are the executable definition.

/// Bucket tuning: capacity and steady-state refill rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucket {
    /// Maximum tokens the bucket holds.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
}

/// Stored bucket state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Tokens remaining after the last update.
    pub tokens: f64,
    /// Wall-clock of the last refill, in epoch milliseconds.
    pub last_refill_ms: i64,
}

/// Outcome of a consume attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Whole tokens remaining after the attempt.
    pub remaining: u64,
    /// How long until `cost` tokens will be available; 0 when allowed.
    pub retry_after_ms: u64,
}

impl TokenBucket {
    pub const fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
        }
    }

    /// Refill the bucket for elapsed time, then try to subtract `cost`.
    ///
    /// Returns the new state to persist and the decision. The new state
    /// must be written back even on refusal so the refill timestamp
    /// advances.
    pub fn refill_then_consume(
        &self,
        state: Option<BucketState>,
        now_ms: i64,
        cost: f64,
    ) -> (BucketState, Decision) {
        let (mut tokens, last_refill_ms) = match state {
            Some(s) => (s.tokens, s.last_refill_ms),
            None => (self.capacity, now_ms),
        };

        let elapsed_ms = (now_ms - last_refill_ms).max(0) as f64;
        tokens = (tokens + elapsed_ms * self.refill_rate / 1000.0).min(self.capacity);

        if tokens >= cost {
            let new_state = BucketState {
                tokens: tokens - cost,
                last_refill_ms: now_ms,
            };
            let decision = Decision {
                allowed: true,
                remaining: new_state.tokens.floor() as u64,
                retry_after_ms: 0,
            };
            (new_state, decision)
        } else {
            let deficit = cost - tokens;
            let retry_after_ms = if self.refill_rate > 0.0 {
                (deficit / self.refill_rate * 1000.0).ceil() as u64
            } else {
                u64::MAX
            };

            let new_state = BucketState {
                tokens,
                last_refill_ms: now_ms,
            };
            let decision = Decision {
                allowed: false,
                remaining: tokens.floor() as u64,
                retry_after_ms,
            };
            (new_state, decision)
        }
    }
}

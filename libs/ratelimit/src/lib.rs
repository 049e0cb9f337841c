//! Token-bucket rate limiting over Redis.
//!
//! Every submission is checked against three buckets: `user:{user_id}`,
//! `ip:{ip}` and `global`. A submission is admitted only when all three
//! have a token.
//!
//! The bucket update is a pure function ([`TokenBucket::refill_then_consume`])
//! executed atomically on Redis via a short EVAL script, so concurrent
//! requests against the same bucket cannot double-spend. Bucket state
//! carries a 24 h TTL; idle principals age out on their own.
//!
//! When Redis is unreachable the limiter **fails open**: the request is
//! admitted and the caller is told so it can count the event. An outage of
//! the rate-limit store must never reject user traffic.

mod bucket;
mod limiter;

pub use bucket::{BucketState, Decision, TokenBucket};
pub use limiter::{BucketClass, RateLimitConfig, RateLimitOutcome, RateLimiter};

//! Redis-backed execution of the token bucket.

use crate::bucket::{Decision, TokenBucket};
use core_config::{env_parse_or, ConfigError};
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::warn;

/// Bucket state TTL. Idle principals age out of Redis after a day.
const BUCKET_TTL_SECS: i64 = 24 * 3600;

/// The pure bucket update, executed atomically server-side.
///
/// KEYS[1] = bucket hash key
/// ARGV    = capacity, refill_rate (tokens/sec), cost, now_ms, ttl_secs
/// Returns = { allowed (0/1), remaining, retry_after_ms }
const CONSUME_SCRIPT: &str = r#"
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local cost = tonumber(ARGV[3])
local now_ms = tonumber(ARGV[4])
local ttl_secs = tonumber(ARGV[5])

local state = redis.call('HMGET', KEYS[1], 'tokens', 'last_refill_ms')
local tokens = tonumber(state[1])
local last_refill_ms = tonumber(state[2])

if tokens == nil then
  tokens = capacity
  last_refill_ms = now_ms
end

local elapsed_ms = now_ms - last_refill_ms
if elapsed_ms < 0 then
  elapsed_ms = 0
end

tokens = tokens + elapsed_ms * refill_rate / 1000.0
if tokens > capacity then
  tokens = capacity
end

local allowed = 0
local retry_after_ms = 0

if tokens >= cost then
  allowed = 1
  tokens = tokens - cost
else
  local deficit = cost - tokens
  retry_after_ms = math.ceil(deficit / refill_rate * 1000.0)
end

redis.call('HSET', KEYS[1], 'tokens', tokens, 'last_refill_ms', now_ms)
redis.call('EXPIRE', KEYS[1], ttl_secs)

return { allowed, math.floor(tokens), retry_after_ms }
"#;

/// The three bucket classes checked per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketClass {
    User,
    Ip,
    Global,
}

impl BucketClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Ip => "ip",
            Self::Global => "global",
        }
    }
}

/// Per-class bucket tuning.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub user: TokenBucket,
    pub ip: TokenBucket,
    pub global: TokenBucket,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            user: TokenBucket::new(10.0, 0.2),
            ip: TokenBucket::new(30.0, 0.5),
            global: TokenBucket::new(500.0, 50.0),
        }
    }
}

impl RateLimitConfig {
    /// Load overrides from the environment:
    /// `RATE_LIMIT_{USER,IP,GLOBAL}_{CAPACITY,REFILL_PER_SEC}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            user: TokenBucket::new(
                env_parse_or("RATE_LIMIT_USER_CAPACITY", defaults.user.capacity)?,
                env_parse_or("RATE_LIMIT_USER_REFILL_PER_SEC", defaults.user.refill_rate)?,
            ),
            ip: TokenBucket::new(
                env_parse_or("RATE_LIMIT_IP_CAPACITY", defaults.ip.capacity)?,
                env_parse_or("RATE_LIMIT_IP_REFILL_PER_SEC", defaults.ip.refill_rate)?,
            ),
            global: TokenBucket::new(
                env_parse_or("RATE_LIMIT_GLOBAL_CAPACITY", defaults.global.capacity)?,
                env_parse_or(
                    "RATE_LIMIT_GLOBAL_REFILL_PER_SEC",
                    defaults.global.refill_rate,
                )?,
            ),
        })
    }

    fn bucket(&self, class: BucketClass) -> TokenBucket {
        match class {
            BucketClass::User => self.user,
            BucketClass::Ip => self.ip,
            BucketClass::Global => self.global,
        }
    }
}

/// Result of the full three-bucket submission check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitOutcome {
    pub allowed: bool,
    /// Which bucket refused, when refused.
    pub refused_by: Option<BucketClass>,
    /// Longest retry-after across refusing buckets.
    pub retry_after_ms: u64,
    /// True when the store was unreachable and the request was admitted
    /// without a check.
    pub failed_open: bool,
}

impl RateLimitOutcome {
    fn allowed() -> Self {
        Self {
            allowed: true,
            refused_by: None,
            retry_after_ms: 0,
            failed_open: false,
        }
    }

    fn fail_open() -> Self {
        Self {
            allowed: true,
            refused_by: None,
            retry_after_ms: 0,
            failed_open: true,
        }
    }
}

/// Token-bucket rate limiter over Redis.
#[derive(Clone)]
pub struct RateLimiter {
    redis: ConnectionManager,
    config: RateLimitConfig,
    script: Script,
}

impl RateLimiter {
    pub fn new(redis: ConnectionManager, config: RateLimitConfig) -> Self {
        Self {
            redis,
            config,
            script: Script::new(CONSUME_SCRIPT),
        }
    }

    /// Consume `cost` tokens from one bucket.
    ///
    /// Store failures fail open with `allowed = true`; the caller records
    /// the event.
    pub async fn consume(
        &self,
        class: BucketClass,
        key: &str,
        cost: f64,
    ) -> Result<Decision, redis::RedisError> {
        let bucket = self.config.bucket(class);
        let redis_key = match class {
            BucketClass::Global => "ratelimit:global".to_string(),
            _ => format!("ratelimit:{}:{}", class.as_str(), key),
        };
        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut conn = self.redis.clone();
        let reply: Vec<i64> = self
            .script
            .key(&redis_key)
            .arg(bucket.capacity)
            .arg(bucket.refill_rate)
            .arg(cost)
            .arg(now_ms)
            .arg(BUCKET_TTL_SECS)
            .invoke_async(&mut conn)
            .await?;

        Ok(Decision {
            allowed: reply.first().copied().unwrap_or(0) == 1,
            remaining: reply.get(1).copied().unwrap_or(0).max(0) as u64,
            retry_after_ms: reply.get(2).copied().unwrap_or(0).max(0) as u64,
        })
    }

    /// Check all three buckets for one submission.
    ///
    /// Admitted only when user, IP and global buckets all have a token.
    /// The first refusing bucket short-circuits. Store errors fail open.
    pub async fn check_submission(&self, user_id: &str, ip: &str) -> RateLimitOutcome {
        let checks = [
            (BucketClass::User, user_id),
            (BucketClass::Ip, ip),
            (BucketClass::Global, ""),
        ];

        for (class, key) in checks {
            match self.consume(class, key, 1.0).await {
                Ok(decision) if decision.allowed => {}
                Ok(decision) => {
                    return RateLimitOutcome {
                        allowed: false,
                        refused_by: Some(class),
                        retry_after_ms: decision.retry_after_ms,
                        failed_open: false,
                    };
                }
                Err(e) => {
                    warn!(
                        bucket = class.as_str(),
                        error = %e,
                        "Rate-limit store unavailable, failing open"
                    );
                    return RateLimitOutcome::fail_open();
                }
            }
        }

        RateLimitOutcome::allowed()
    }
}

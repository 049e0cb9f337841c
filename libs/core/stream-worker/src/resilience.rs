//! Circuit breaker for cascading failure protection.
//!
//! ```text
//! ┌─────────┐  failures >= threshold  ┌────────┐
//! │ CLOSED  │ ──────────────────────> │  OPEN  │
//! └─────────┘                         └────────┘
//!      ^                                   │
//!      │                                   │ recovery time elapsed
//!      │                                   v
//!      │   success >= threshold   ┌─────────────┐
//!      └───────────────────────── │  HALF-OPEN  │
//!                                 └─────────────┘
//!                                       │
//!                       any failure     │
//!                       ────────────────┘
//! ```
//!
//! Consecutive failures only trip the breaker if they land within the
//! failure window; a stale streak is forgotten.

use crate::metrics;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected immediately.
    Open,
    /// Probing whether the downstream recovered.
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(&self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub recovery_time: Duration,
    /// Consecutive successes in half-open before closing.
    pub success_threshold: u32,
    /// Window in which consecutive failures must land to count.
    pub failure_window: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_time: Duration::from_millis(30_000),
            success_threshold: 3,
            failure_window: Duration::from_millis(60_000),
        }
    }
}

/// Thread-safe circuit breaker.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    first_failure_at: RwLock<Option<Instant>>,
    last_failure_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            first_failure_at: RwLock::new(None),
            last_failure_at: RwLock::new(None),
        }
    }

    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, CircuitBreakerConfig::default())
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap()
    }

    /// Whether a request may proceed. An open circuit transitions to
    /// half-open once the recovery time has elapsed.
    pub fn can_execute(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.recovery_elapsed() {
                    self.transition(CircuitState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
                *self.first_failure_at.write().unwrap() = None;
            }
            CircuitState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                if successes >= self.config.success_threshold {
                    self.transition(CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                self.transition(CircuitState::Closed);
            }
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        *self.last_failure_at.write().unwrap() = Some(now);

        match self.state() {
            CircuitState::Closed => {
                // A streak older than the failure window starts over
                let mut first = self.first_failure_at.write().unwrap();
                match *first {
                    Some(start) if now.duration_since(start) <= self.config.failure_window => {}
                    _ => {
                        *first = Some(now);
                        self.failure_count.store(0, Ordering::SeqCst);
                    }
                }
                drop(first);

                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    fn recovery_elapsed(&self) -> bool {
        match *self.last_failure_at.read().unwrap() {
            Some(at) => at.elapsed() >= self.config.recovery_time,
            None => true,
        }
    }

    fn transition(&self, to: CircuitState) {
        let mut state = self.state.write().unwrap();
        if *state == to {
            return;
        }
        *state = to;
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        if to == CircuitState::Closed {
            *self.first_failure_at.write().unwrap() = None;
        }
        metrics::set_circuit_state(&self.name, to.gauge_value());

        match to {
            CircuitState::Open => tracing::warn!(breaker = %self.name, "Circuit breaker OPENED"),
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, "Circuit breaker HALF-OPEN (probing)")
            }
            CircuitState::Closed => {
                tracing::info!(breaker = %self.name, "Circuit breaker CLOSED (recovered)")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config(failure_threshold: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            recovery_time: Duration::from_millis(0),
            success_threshold: 2,
            failure_window: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_initial_state_closed() {
        let breaker = CircuitBreaker::with_defaults("test");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("test", quick_config(3));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new("test", quick_config(3));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.failure_count(), 2);

        breaker.record_success();
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let breaker = CircuitBreaker::new("test", quick_config(1));

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // recovery_time is zero, so the next check probes
        std::thread::sleep(Duration::from_millis(5));
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_reopens_on_failure() {
        let breaker = CircuitBreaker::new("test", quick_config(1));

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        breaker.can_execute();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_rejects_before_recovery() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_time: Duration::from_secs(60),
            ..Default::default()
        };
        let breaker = CircuitBreaker::new("test", config);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn test_stale_failure_streak_forgotten() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            failure_window: Duration::from_millis(20),
            ..quick_config(2)
        };
        let breaker = CircuitBreaker::new("test", config);

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(40));
        // The first failure is outside the window, so this is a new streak
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}

//! Circuit breaker for per-destination failure isolation
//!
//! # States
//! ```text
//! Closed → Open: failure_threshold failures within failure_window
//! Open → Half-Open: after timeout has elapsed since the last failure
//! Half-Open → Closed: success_threshold trial calls succeed
//! Half-Open → Open: any trial call fails
//! ```
//!
//! Every state read and transition happens under one lock, so admission and
//! outcome signals are atomic with respect to concurrent callers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::engine::Rejection;

//==============================================================================
// Error Types
//==============================================================================

/// Simple configuration error for validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type using simple config errors
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing limited requests to test recovery
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// How a call was let through; needed to settle half-open trial slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted while closed
    Normal,
    /// Admitted as one of the limited half-open trial calls of the
    /// half-open episode numbered `epoch`
    Trial { epoch: u64 },
}

/// Outcome reported back for an admitted call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded
    Success,
    /// The call failed in a way that reflects the resource's health
    Failure,
    /// The call finished without a health signal
    Released,
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Number of failures within `failure_window` before opening the circuit
    pub failure_threshold: u64,
    /// Number of successes needed to close the circuit from half-open
    pub success_threshold: u64,
    /// Time to wait before transitioning from open to half-open
    pub timeout: Duration,
    /// Failures older than this no longer count toward the threshold
    pub failure_window: Duration,
    /// Maximum number of concurrent trial calls in half-open state
    pub half_open_max_calls: u64,
    /// Whether to reset failure count on success in closed state
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: Duration::from_secs(10),
            failure_window: Duration::from_secs(10),
            half_open_max_calls: 1,
            reset_on_success: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "success_threshold must be greater than 0".to_string(),
            });
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid {
                message: "half_open_max_calls must be greater than 0".to_string(),
            });
        }

        if self.failure_window.is_zero() {
            return Err(ConfigError::Invalid {
                message: "failure_window must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CircuitBreakerConfig
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn failure_window(mut self, window: Duration) -> Self {
        self.config.failure_window = window;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    /// Failures currently inside the failure window
    pub recent_failures: u64,
    pub failure_count: u64,
    pub success_count: u64,
    pub half_open_calls: u64,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_time: Option<Instant>,
    pub state_change_time: Instant,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    recent_failures: VecDeque<Instant>,
    half_open_in_flight: u64,
    half_open_successes: u64,
    /// Incremented on every entry into HALF-OPEN
    half_open_epoch: u64,
    last_failure_time: Option<Instant>,
    state_change_time: Instant,
}

impl BreakerState {
    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        self.state_change_time = now;
        self.half_open_in_flight = 0;
        self.half_open_successes = 0;
        if to == CircuitState::HalfOpen {
            self.half_open_epoch += 1;
        }
        if to == CircuitState::Closed {
            self.recent_failures.clear();
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.recent_failures.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Circuit breaker for one destination
///
/// Clones share state, so a breaker can be handed to several permits.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<BreakerState>>,
    failure_count: Arc<AtomicU64>,
    success_count: Arc<AtomicU64>,
    total_calls: Arc<AtomicU64>,
    rejected_calls: Arc<AtomicU64>,
    clock: Arc<C>,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count.load(Ordering::Acquire))
            .field("success_count", &self.success_count.load(Ordering::Acquire))
            .finish()
    }
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            failure_count: Arc::clone(&self.failure_count),
            success_count: Arc::clone(&self.success_count),
            total_calls: Arc::clone(&self.total_calls),
            rejected_calls: Arc::clone(&self.rejected_calls),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a new circuit breaker using the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a new circuit breaker with a custom clock (useful for testing)
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        let now = clock.now();
        Ok(Self {
            config,
            inner: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                recent_failures: VecDeque::new(),
                half_open_in_flight: 0,
                half_open_successes: 0,
                half_open_epoch: 0,
                last_failure_time: None,
                state_change_time: now,
            })),
            failure_count: Arc::new(AtomicU64::new(0)),
            success_count: Arc::new(AtomicU64::new(0)),
            total_calls: Arc::new(AtomicU64::new(0)),
            rejected_calls: Arc::new(AtomicU64::new(0)),
            clock: Arc::new(clock),
        })
    }

    /// Configuration this breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Request admission for one call
    ///
    /// An OPEN circuit whose timeout has elapsed moves to HALF-OPEN here and
    /// the caller becomes the first trial call.
    pub fn try_acquire(&self) -> Result<Admission, Rejection> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let admission = match inner.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let since = inner.last_failure_time.unwrap_or(inner.state_change_time);
                let elapsed = now.saturating_duration_since(since);
                if elapsed < self.config.timeout {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    return Err(Rejection::CircuitOpen {
                        retry_after: Some(self.config.timeout - elapsed),
                    });
                }
                inner.transition(CircuitState::HalfOpen, now);
                info!("Circuit breaker half-open after {:?} cooldown", elapsed);
                inner.half_open_in_flight = 1;
                Admission::Trial { epoch: inner.half_open_epoch }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight >= self.config.half_open_max_calls {
                    self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                    return Err(Rejection::CircuitOpen { retry_after: None });
                }
                inner.half_open_in_flight += 1;
                Admission::Trial { epoch: inner.half_open_epoch }
            }
        };

        self.total_calls.fetch_add(1, Ordering::Relaxed);
        Ok(admission)
    }

    /// Check if the circuit would currently admit a call
    ///
    /// Unlike [`try_acquire`](Self::try_acquire) this never changes state.
    pub fn can_execute(&self) -> bool {
        let now = self.clock.now();
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let since = inner.last_failure_time.unwrap_or(inner.state_change_time);
                now.saturating_duration_since(since) >= self.config.timeout
            }
            CircuitState::HalfOpen => inner.half_open_in_flight < self.config.half_open_max_calls,
        }
    }

    /// Settle an admitted call
    ///
    /// A trial from a half-open episode that has already ended is counted in
    /// the metrics but neither frees a slot nor moves the state of a later
    /// episode.
    pub fn complete(&self, admission: Admission, outcome: Outcome) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        if let Admission::Trial { epoch } = admission {
            let current =
                inner.state == CircuitState::HalfOpen && epoch == inner.half_open_epoch;
            if !current {
                debug!(epoch, ?outcome, "Settled trial from an earlier half-open episode");
                match outcome {
                    Outcome::Success => {
                        self.success_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Outcome::Failure => {
                        self.failure_count.fetch_add(1, Ordering::Relaxed);
                    }
                    Outcome::Released => {}
                }
                return;
            }
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match outcome {
            Outcome::Success => self.on_success(&mut inner, now),
            Outcome::Failure => self.on_failure(&mut inner, now),
            Outcome::Released => {}
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        self.complete(Admission::Normal, Outcome::Success);
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        self.complete(Admission::Normal, Outcome::Failure);
    }

    fn on_success(&self, inner: &mut BreakerState, now: Instant) {
        self.success_count.fetch_add(1, Ordering::Relaxed);

        match inner.state {
            CircuitState::Closed => {
                if self.config.reset_on_success {
                    inner.recent_failures.clear();
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    let successes = inner.half_open_successes;
                    inner.transition(CircuitState::Closed, now);
                    info!("Circuit breaker closed after {} successes", successes);
                }
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened finished late
                debug!("Received success while circuit is open");
            }
        }
    }

    fn on_failure(&self, inner: &mut BreakerState, now: Instant) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                inner.recent_failures.push_back(now);
                inner.prune(now, self.config.failure_window);
                let recent = inner.recent_failures.len() as u64;
                if recent >= self.config.failure_threshold {
                    inner.transition(CircuitState::Open, now);
                    warn!("Circuit breaker opened after {} failures", recent);
                }
            }
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open, now);
                warn!("Circuit breaker opened due to failure in half-open state");
            }
            CircuitState::Open => {}
        }
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Get circuit breaker metrics
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            recent_failures: inner.recent_failures.len() as u64,
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            half_open_calls: inner.half_open_in_flight,
            total_calls: self.total_calls.load(Ordering::Acquire),
            rejected_calls: self.rejected_calls.load(Ordering::Acquire),
            last_failure_time: inner.last_failure_time,
            state_change_time: inner.state_change_time,
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.transition(CircuitState::Closed, now);
        inner.last_failure_time = None;
        info!("Circuit breaker manually reset to closed state");
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for circuit breaker state transitions, configuration
    //! validation, and failure window behavior.

    use super::*;
    use crate::resilience::clock::MockClock;

    fn breaker(threshold: u64, clock: &MockClock) -> CircuitBreaker<MockClock> {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(threshold)
            .success_threshold(2)
            .timeout(Duration::from_secs(30))
            .failure_window(Duration::from_secs(60))
            .build()
            .expect("Should build valid config");
        CircuitBreaker::with_clock(config, clock.clone()).expect("Should create circuit breaker")
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    #[test]
    fn test_circuit_breaker_config_validation() {
        let mut config = CircuitBreakerConfig::default();
        assert!(config.validate().is_ok());

        config.failure_threshold = 0;
        assert!(config.validate().is_err());

        config.failure_threshold = 5;
        config.success_threshold = 0;
        assert!(config.validate().is_err());

        config.success_threshold = 2;
        config.half_open_max_calls = 0;
        assert!(config.validate().is_err());

        config.half_open_max_calls = 1;
        config.failure_window = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_circuit_breaker_config_builder_validation_fails() {
        let result = CircuitBreakerConfig::builder().failure_threshold(0).build();
        assert!(result.is_err());
    }

    /// Tests that circuit opens when failure threshold is reached
    #[test]
    fn test_circuit_breaker_opens_after_failures() {
        let clock = MockClock::new();
        let cb = breaker(3, &clock);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed, "Should remain closed below threshold");

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open, "Should open at threshold");
        assert!(!cb.can_execute(), "Should reject requests when open");
        assert!(matches!(cb.try_acquire(), Err(Rejection::CircuitOpen { retry_after: Some(_) })));
    }

    /// Failures that fall out of the window no longer count
    #[test]
    fn test_circuit_breaker_failure_window_expires() {
        let clock = MockClock::new();
        let cb = breaker(2, &clock);

        cb.record_failure();
        clock.advance(Duration::from_secs(61));
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().recent_failures, 1);
    }

    #[test]
    fn test_circuit_breaker_timeout_not_elapsed() {
        let clock = MockClock::new();
        let cb = breaker(1, &clock);

        cb.record_failure();
        clock.advance(Duration::from_secs(20));

        match cb.try_acquire() {
            Err(Rejection::CircuitOpen { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(10)));
            }
            other => panic!("Expected CircuitOpen, got {:?}", other),
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_circuit_breaker_recovery_flow() {
        let clock = MockClock::new();
        let cb = breaker(1, &clock);

        cb.record_failure();
        clock.advance(Duration::from_secs(31));

        let first = cb.try_acquire().expect("first trial admitted");
        assert_eq!(first, Admission::Trial { epoch: 1 });
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Only one trial at a time by default
        assert!(cb.try_acquire().is_err());

        cb.complete(first, Outcome::Success);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let second = cb.try_acquire().expect("second trial admitted");
        cb.complete(second, Outcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_breaker_half_open_failure_reopens() {
        let clock = MockClock::new();
        let cb = breaker(1, &clock);

        cb.record_failure();
        clock.advance(Duration::from_secs(31));

        let trial = cb.try_acquire().expect("trial admitted");
        cb.complete(trial, Outcome::Failure);

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.can_execute());
    }

    /// A released trial frees its slot without moving the state
    #[test]
    fn test_circuit_breaker_released_trial_frees_slot() {
        let clock = MockClock::new();
        let cb = breaker(1, &clock);

        cb.record_failure();
        clock.advance(Duration::from_secs(31));

        let trial = cb.try_acquire().expect("trial admitted");
        assert!(!cb.can_execute());

        cb.complete(trial, Outcome::Released);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.can_execute());
    }

    /// Trials outliving their half-open episode cannot settle a later one
    #[test]
    fn test_circuit_breaker_stale_trial_is_ignored() {
        let clock = MockClock::new();
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .success_threshold(1)
            .timeout(Duration::from_secs(30))
            .half_open_max_calls(2)
            .build()
            .expect("Should build valid config");
        let cb = CircuitBreaker::with_clock(config, clock.clone()).expect("valid breaker");

        cb.record_failure();
        clock.advance(Duration::from_secs(31));
        let slow = cb.try_acquire().expect("first trial");
        let failing = cb.try_acquire().expect("second trial");
        cb.complete(failing, Outcome::Failure);
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(31));
        let current = cb.try_acquire().expect("trial of the next episode");
        assert_eq!(current, Admission::Trial { epoch: 2 });

        // Neither closes the circuit nor frees a slot of the new episode
        cb.complete(slow, Outcome::Success);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.metrics().half_open_calls, 1);
        assert_eq!(cb.metrics().success_count, 1);

        cb.complete(current, Outcome::Success);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_breaker_reset_on_success() {
        let clock = MockClock::new();
        let cb = breaker(3, &clock);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().recent_failures, 1);
    }

    #[test]
    fn test_circuit_breaker_counts_rejections() {
        let config = CircuitBreakerConfig::builder().failure_threshold(1).build().unwrap();
        let cb = CircuitBreaker::new(config).unwrap();

        let admission = cb.try_acquire().expect("closed circuit admits");
        cb.complete(admission, Outcome::Failure);

        assert!(matches!(cb.try_acquire(), Err(Rejection::CircuitOpen { .. })));
        let metrics = cb.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.rejected_calls, 1);
    }

    #[test]
    fn test_circuit_breaker_reset() {
        let clock = MockClock::new();
        let cb = breaker(1, &clock);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.metrics().last_failure_time.is_none());
    }

    #[test]
    fn test_circuit_breaker_clone_shares_state() {
        let clock = MockClock::new();
        let cb1 = breaker(1, &clock);
        let cb2 = cb1.clone();

        cb1.record_failure();
        assert_eq!(cb2.state(), CircuitState::Open);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Invalid { message: "bad value".to_string() };
        assert!(err.to_string().contains("bad value"));
    }
}

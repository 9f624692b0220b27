//! Resilience patterns for per-destination failure isolation
//!
//! This module provides:
//! - **Circuit Breaker**: stops calling a destination after repeated
//!   failures and probes it again after a cooldown
//! - **Bulkhead**: caps concurrent calls to a destination, rejecting rather
//!   than queueing
//! - **Protection engine**: the [`ProtectionEngine`] / [`Permit`] contract
//!   interceptors program against, with [`ResourceRegistry`] as the default
//!   implementation keyed by destination identity
//!
//! ## Architecture
//!
//! The primitives are generic and synchronous. None of them waits: admission
//! either succeeds immediately or returns a [`Rejection`]. Time is read
//! through [`Clock`] so tests can drive cooldowns with [`MockClock`].

pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod engine;
pub mod registry;
pub mod settings;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadMetrics, BulkheadPermit};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerMetrics, CircuitState, ConfigError, ConfigResult, Outcome,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use engine::{Permit, ProtectionEngine, Rejection};
pub use registry::{ResourceMetrics, ResourcePermit, ResourceRegistry};
pub use settings::ProtectionSettings;

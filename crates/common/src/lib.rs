//! Shared building blocks for the Floodgate workspace.
//!
//! # Safety and Quality
//!
//! This crate enforces strict safety and quality standards; it is consumed by
//! every client wrapper in the workspace.
//!
//! # Modules
//!
//! - [`error`]: error taxonomy (`CommonError`, `ErrorClassification`,
//!   `ErrorSeverity`)
//! - [`resilience`]: clock abstraction, circuit breaker, bulkhead, and the
//!   protection engine contract with its default `ResourceRegistry`
//! - [`utils`]: serde helpers
//! - `testing` (feature `test-utils`): spy engine for downstream tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod error;
pub mod resilience;
pub mod utils;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(any(feature = "test-utils", test))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
pub use error::{CommonError, CommonResult, ErrorClassification, ErrorSeverity};
pub use resilience::{
    BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, MockClock, Permit,
    ProtectionEngine, ProtectionSettings, Rejection, ResourceRegistry, SystemClock,
};
pub use utils::serde::{duration_millis, option_duration_millis};

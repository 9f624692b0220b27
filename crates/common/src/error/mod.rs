//! Common error types and classification for Floodgate crates
//!
//! # Error Handling Architecture
//!
//! The error handling system is built on three key components:
//!
//! 1. **`CommonError`**: the error patterns shared by every protected client
//!    (open circuits, exhausted bulkheads, backend failures, configuration
//!    misuse)
//!
//! 2. **`ErrorClassification` trait**: a standard interface for classifying
//!    errors by their characteristics (retryability, severity, criticality)
//!
//! 3. **`ErrorSeverity` enum**: a unified severity level used for logging
//!    and alerting
//!
//! Crate-specific errors (for example the interceptor's `GuardError`)
//! implement `ErrorClassification` and convert into `CommonError` so callers
//! that only care about the broad category can match on a single type.
//!
//! ## Standard Error Patterns
//!
//! | Pattern | CommonError Variant | When to Use |
//! |---------|-------------------|-------------|
//! | **Circuit Breaker** | `CircuitBreakerOpen` | Destination is failing, calls are shed |
//! | **Bulkhead** | `ResourceBusy` | Concurrency cap for a destination reached |
//! | **Backend** | `Backend` | Failure reported by the wrapped client |
//! | **Configuration** | `Config` | Invalid settings, repeated resolver install |
//! | **Persistence** | `Persistence` | File I/O while loading settings |
//!
//! ## ErrorSeverity Levels
//!
//! | Level | Use Case | Examples |
//! |-------|----------|----------|
//! | **Info** | Expected conditions | Call bypassed, resource not registered |
//! | **Warning** | Degraded but operational | Circuit open, bulkhead full |
//! | **Error** | Failure requiring attention | Connection broken, invalid config |
//! | **Critical** | System integrity at risk | Not raised by this crate |

use std::fmt;
use std::time::Duration;

/// Standard result type using CommonError
pub type CommonResult<T> = Result<T, CommonError>;

/// Common error variants that appear across multiple crates
#[derive(Debug, Clone)]
pub enum CommonError {
    /// Configuration-related errors
    Config { message: String, field: Option<String> },

    /// Circuit breaker is open, preventing operations
    CircuitBreakerOpen { service: String, retry_after: Option<Duration> },

    /// Bulkhead has no free tickets for the destination
    ResourceBusy { service: String, capacity: Option<usize> },

    /// Network or backend connectivity errors
    Backend { service: String, message: String, is_retryable: bool },

    /// Data persistence errors (file I/O)
    Persistence { message: String, operation: Option<String> },
}

impl fmt::Display for CommonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { message, field } => {
                if let Some(field) = field {
                    write!(f, "Configuration error in field '{}': {}", field, message)
                } else {
                    write!(f, "Configuration error: {}", message)
                }
            }
            Self::CircuitBreakerOpen { service, retry_after } => {
                if let Some(retry) = retry_after {
                    write!(f, "Circuit breaker open for '{}' (retry in {:?})", service, retry)
                } else {
                    write!(f, "Circuit breaker open for '{}'", service)
                }
            }
            Self::ResourceBusy { service, capacity } => {
                if let Some(capacity) = capacity {
                    write!(f, "Resource '{}' busy ({} concurrent calls)", service, capacity)
                } else {
                    write!(f, "Resource '{}' busy", service)
                }
            }
            Self::Backend { service, message, .. } => {
                write!(f, "Backend error from '{}': {}", service, message)
            }
            Self::Persistence { message, operation } => {
                if let Some(op) = operation {
                    write!(f, "Persistence error during '{}': {}", op, message)
                } else {
                    write!(f, "Persistence error: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for CommonError {}

impl ErrorClassification for CommonError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::CircuitBreakerOpen { .. } | Self::ResourceBusy { .. } => true,
            Self::Backend { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::CircuitBreakerOpen { .. } | Self::ResourceBusy { .. } => ErrorSeverity::Warning,
            Self::Config { .. } | Self::Backend { .. } | Self::Persistence { .. } => {
                ErrorSeverity::Error
            }
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitBreakerOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl CommonError {
    /// Create a simple configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), field: None }
    }

    /// Create a configuration error for a specific field
    pub fn config_field<S: Into<String>, F: Into<String>>(field: F, message: S) -> Self {
        Self::Config { message: message.into(), field: Some(field.into()) }
    }

    /// Create a circuit breaker error
    pub fn circuit_breaker<S: Into<String>>(service: S) -> Self {
        Self::CircuitBreakerOpen { service: service.into(), retry_after: None }
    }

    /// Create a circuit breaker error with retry timing
    pub fn circuit_breaker_with_retry<S: Into<String>>(service: S, retry_after: Duration) -> Self {
        Self::CircuitBreakerOpen { service: service.into(), retry_after: Some(retry_after) }
    }

    /// Create a resource busy error
    pub fn resource_busy<S: Into<String>>(service: S, capacity: Option<usize>) -> Self {
        Self::ResourceBusy { service: service.into(), capacity }
    }

    /// Create a backend error
    pub fn backend<S: Into<String>, M: Into<String>>(
        service: S,
        message: M,
        is_retryable: bool,
    ) -> Self {
        Self::Backend { service: service.into(), message: message.into(), is_retryable }
    }

    /// Create a simple persistence error
    pub fn persistence<S: Into<String>>(message: S) -> Self {
        Self::Persistence { message: message.into(), operation: None }
    }

    /// Convert error to structured logging fields
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let err = CommonError::circuit_breaker("postgresql_db1:5432");
    /// let fields = err.as_tracing_fields();
    /// tracing::warn!(error_type = %fields[0].1, service = %fields[1].1, "call rejected");
    /// ```
    pub fn as_tracing_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("error_type", self.error_type_name().to_string())];

        match self {
            Self::Config { message, field } => {
                fields.push(("message", message.clone()));
                if let Some(field) = field {
                    fields.push(("field", field.clone()));
                }
            }
            Self::CircuitBreakerOpen { service, retry_after } => {
                fields.push(("service", service.clone()));
                if let Some(retry) = retry_after {
                    fields.push(("retry_after_ms", retry.as_millis().to_string()));
                }
            }
            Self::ResourceBusy { service, capacity } => {
                fields.push(("service", service.clone()));
                if let Some(capacity) = capacity {
                    fields.push(("capacity", capacity.to_string()));
                }
            }
            Self::Backend { service, message, is_retryable } => {
                fields.push(("service", service.clone()));
                fields.push(("message", message.clone()));
                fields.push(("is_retryable", is_retryable.to_string()));
            }
            Self::Persistence { message, operation } => {
                fields.push(("message", message.clone()));
                if let Some(op) = operation {
                    fields.push(("operation", op.clone()));
                }
            }
        }

        fields
    }

    /// Stable, snake_case name of the variant for logs and metrics labels
    pub fn error_type_name(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::CircuitBreakerOpen { .. } => "circuit_breaker_open",
            Self::ResourceBusy { .. } => "resource_busy",
            Self::Backend { .. } => "backend",
            Self::Persistence { .. } => "persistence",
        }
    }
}

/// Standard classification interface for errors
///
/// All error types in the workspace implement this so retry and alerting
/// decisions do not depend on concrete error types.
///
/// ```rust,ignore
/// fn should_retry<E: ErrorClassification>(err: &E) -> Option<Duration> {
///     err.is_retryable().then(|| err.retry_after().unwrap_or_default())
/// }
/// ```
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are typically transient issues that may succeed if
    /// attempted again, such as:
    /// - Circuit breaker open states
    /// - Exhausted bulkheads
    /// - Broken connections
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl From<crate::resilience::ConfigError> for CommonError {
    fn from(err: crate::resilience::ConfigError) -> Self {
        match err {
            crate::resilience::ConfigError::Invalid { message } => Self::config(message),
        }
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

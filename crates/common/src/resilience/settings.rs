//! Per-destination protection settings
//!
//! `ProtectionSettings` is what a configuration resolver hands back for a
//! destination. Every field has a default, so partial TOML or JSON documents
//! deserialize cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::bulkhead::BulkheadConfig;
use super::circuit_breaker::{CircuitBreakerConfig, ConfigError, ConfigResult};
use crate::utils::serde::{duration_millis, option_duration_millis};

/// Circuit breaker and bulkhead parameters for one destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionSettings {
    /// Explicit resource name; replaces the synthesized `host:port`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Whether the circuit breaker is enabled
    pub circuit_breaker: bool,

    /// Failures within the failure window that open the circuit
    pub failure_threshold: u64,

    /// Successful trial calls that close a half-open circuit
    pub success_threshold: u64,

    /// How long an open circuit rejects calls before probing
    #[serde(rename = "error_timeout_ms", with = "duration_millis")]
    pub error_timeout: Duration,

    /// Window in which failures are counted; defaults to `error_timeout`
    #[serde(
        rename = "failure_window_ms",
        with = "option_duration_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub failure_window: Option<Duration>,

    /// Concurrent trial calls allowed while half-open
    pub half_open_max_calls: u64,

    /// Maximum concurrent protected calls; `None` disables the bulkhead
    pub bulkhead: Option<usize>,
}

impl Default for ProtectionSettings {
    fn default() -> Self {
        Self {
            name: None,
            circuit_breaker: true,
            failure_threshold: 3,
            success_threshold: 2,
            error_timeout: Duration::from_secs(10),
            failure_window: None,
            half_open_max_calls: 1,
            bulkhead: Some(10),
        }
    }
}

impl ProtectionSettings {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u64) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u64) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_error_timeout(mut self, timeout: Duration) -> Self {
        self.error_timeout = timeout;
        self
    }

    pub fn with_failure_window(mut self, window: Duration) -> Self {
        self.failure_window = Some(window);
        self
    }

    pub fn with_half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.half_open_max_calls = max_calls;
        self
    }

    pub fn with_bulkhead(mut self, capacity: Option<usize>) -> Self {
        self.bulkhead = capacity;
        self
    }

    pub fn without_circuit_breaker(mut self) -> Self {
        self.circuit_breaker = false;
        self
    }

    /// Effective failure window
    pub fn failure_window(&self) -> Duration {
        self.failure_window.unwrap_or(self.error_timeout)
    }

    /// Validate the settings
    pub fn validate(&self) -> ConfigResult<()> {
        if self.bulkhead == Some(0) {
            return Err(ConfigError::Invalid {
                message: "bulkhead must be greater than 0".to_string(),
            });
        }
        if let Some(bulkhead) = self.bulkhead_config() {
            bulkhead.validate()?;
        }
        if self.circuit_breaker {
            self.circuit_breaker_config().validate()?;
        }
        Ok(())
    }

    /// Circuit breaker configuration derived from these settings
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: self.error_timeout,
            failure_window: self.failure_window(),
            half_open_max_calls: self.half_open_max_calls,
            reset_on_success: true,
        }
    }

    /// Bulkhead configuration, if the bulkhead is enabled
    pub fn bulkhead_config(&self) -> Option<BulkheadConfig> {
        self.bulkhead.map(BulkheadConfig::new)
    }
}

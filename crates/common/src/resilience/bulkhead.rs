//! Bulkhead pattern for limiting concurrent operations
//!
//! The bulkhead prevents resource exhaustion by limiting the number of
//! concurrent operations against one destination. Named after ship bulkheads
//! that contain flooding to specific compartments.
//!
//! Admission never waits: when every ticket is taken the caller is rejected
//! immediately with [`Rejection::Busy`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::circuit_breaker::{ConfigError, ConfigResult};
use super::engine::Rejection;

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed
    pub max_concurrent: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10 }
    }
}

impl BulkheadConfig {
    /// Configuration allowing `max_concurrent` simultaneous operations
    pub fn new(max_concurrent: usize) -> Self {
        Self { max_concurrent }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                message: "max_concurrent must be greater than 0".to_string(),
            });
        }
        if self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid {
                message: format!("max_concurrent must not exceed {}", Semaphore::MAX_PERMITS),
            });
        }
        Ok(())
    }
}

/// Metrics for bulkhead monitoring
#[derive(Debug, Clone)]
pub struct BulkheadMetrics {
    /// Total number of operations admitted
    pub total_operations: u64,
    /// Total number of operations rejected (full)
    pub rejected_operations: u64,
    /// Current number of concurrent operations
    pub current_concurrent: usize,
    /// Maximum concurrent operations allowed
    pub max_concurrent: usize,
}

impl BulkheadMetrics {
    /// Calculate the current utilization as a percentage (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        self.current_concurrent as f64 / self.max_concurrent as f64
    }

    /// Calculate the rejection rate as a percentage (0.0 to 1.0)
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_operations + self.rejected_operations;
        if total == 0 {
            return 0.0;
        }
        self.rejected_operations as f64 / total as f64
    }

    /// Check if the bulkhead is at capacity
    pub fn is_at_capacity(&self) -> bool {
        self.current_concurrent >= self.max_concurrent
    }

    /// Get a human-readable status message
    pub fn status_message(&self) -> String {
        format!(
            "Bulkhead: {}/{} concurrent ({:.1}% utilized), {} rejected",
            self.current_concurrent,
            self.max_concurrent,
            self.utilization() * 100.0,
            self.rejected_operations,
        )
    }
}

/// Ticket held for the duration of one admitted operation
///
/// Dropping it returns the slot to the bulkhead.
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Bulkhead for limiting concurrent operations
///
/// Clones share the same tickets.
///
/// # Examples
///
/// ```rust
/// use floodgate_common::resilience::{Bulkhead, BulkheadConfig};
///
/// let bulkhead = Bulkhead::new(BulkheadConfig::new(1)).unwrap();
///
/// let held = bulkhead.try_acquire().unwrap();
/// assert!(bulkhead.try_acquire().is_err());
///
/// drop(held);
/// assert!(bulkhead.try_acquire().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct Bulkhead {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    total_operations: Arc<AtomicU64>,
    rejected_operations: Arc<AtomicU64>,
}

impl Bulkhead {
    /// Create a new bulkhead with the given configuration
    pub fn new(config: BulkheadConfig) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            total_operations: Arc::new(AtomicU64::new(0)),
            rejected_operations: Arc::new(AtomicU64::new(0)),
            config,
        })
    }

    /// Try to take a ticket without waiting
    pub fn try_acquire(&self) -> Result<BulkheadPermit, Rejection> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                self.total_operations.fetch_add(1, Ordering::Relaxed);
                debug!(
                    available = self.semaphore.available_permits(),
                    "Bulkhead ticket acquired"
                );
                Ok(BulkheadPermit { _permit: permit })
            }
            Err(_) => {
                self.rejected_operations.fetch_add(1, Ordering::Relaxed);
                warn!(capacity = self.config.max_concurrent, "Bulkhead at capacity, rejecting");
                Err(Rejection::Busy { capacity: self.config.max_concurrent })
            }
        }
    }

    /// Get the current number of concurrent operations
    pub fn current_concurrent(&self) -> usize {
        self.config.max_concurrent - self.semaphore.available_permits()
    }

    /// Get bulkhead metrics
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            total_operations: self.total_operations.load(Ordering::Acquire),
            rejected_operations: self.rejected_operations.load(Ordering::Acquire),
            current_concurrent: self.current_concurrent(),
            max_concurrent: self.config.max_concurrent,
        }
    }

    /// Configuration this bulkhead was built with
    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulkhead_config_validation() {
        assert!(BulkheadConfig::default().validate().is_ok());
        assert!(BulkheadConfig::new(0).validate().is_err());
        assert!(BulkheadConfig::new(Semaphore::MAX_PERMITS + 1).validate().is_err());
    }

    #[test]
    fn test_bulkhead_new_rejects_zero_capacity() {
        assert!(Bulkhead::new(BulkheadConfig::new(0)).is_err());
    }

    /// Validates that the bulkhead rejects once every ticket is held and
    /// recovers when a ticket is dropped.
    ///
    /// Assertions:
    /// - third acquire is rejected with the configured capacity
    /// - dropping one permit frees exactly one slot
    #[test]
    fn test_bulkhead_rejects_when_full() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(2)).unwrap();

        let p1 = bulkhead.try_acquire().expect("first ticket");
        let _p2 = bulkhead.try_acquire().expect("second ticket");
        assert_eq!(bulkhead.current_concurrent(), 2);

        match bulkhead.try_acquire() {
            Err(Rejection::Busy { capacity }) => assert_eq!(capacity, 2),
            other => panic!("Expected Busy, got {:?}", other),
        }

        drop(p1);
        assert_eq!(bulkhead.current_concurrent(), 1);
        assert!(bulkhead.try_acquire().is_ok());
    }

    #[test]
    fn test_bulkhead_metrics() {
        let bulkhead = Bulkhead::new(BulkheadConfig::new(1)).unwrap();

        let _held = bulkhead.try_acquire().unwrap();
        let _ = bulkhead.try_acquire();

        let metrics = bulkhead.metrics();
        assert_eq!(metrics.total_operations, 1);
        assert_eq!(metrics.rejected_operations, 1);
        assert!(metrics.is_at_capacity());
        assert!((metrics.utilization() - 1.0).abs() < f64::EPSILON);
        assert!((metrics.rejection_rate() - 0.5).abs() < f64::EPSILON);
        assert!(metrics.status_message().contains("1/1"));
    }

    #[test]
    fn test_bulkhead_clone_shares_tickets() {
        let b1 = Bulkhead::new(BulkheadConfig::new(1)).unwrap();
        let b2 = b1.clone();

        let _held = b1.try_acquire().unwrap();
        assert!(b2.try_acquire().is_err());
    }
}

//! Protection engine contract
//!
//! Interceptors talk to circuit breaker and bulkhead state only through
//! [`ProtectionEngine`] and the [`Permit`] it hands out. The default
//! implementation is [`ResourceRegistry`](super::ResourceRegistry).

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

use super::settings::ProtectionSettings;

/// Why the engine refused to admit a call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Every bulkhead ticket for the destination is in use
    #[error("resource busy ({capacity} concurrent calls)")]
    Busy { capacity: usize },

    /// The destination's circuit is open
    #[error("circuit open{}", retry_suffix(.retry_after))]
    CircuitOpen { retry_after: Option<Duration> },

    /// The settings supplied for the destination cannot build a breaker or bulkhead
    #[error("invalid protection settings: {message}")]
    Misconfigured { message: String },
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    retry_after.map(|d| format!(" (retry in {:?})", d)).unwrap_or_default()
}

/// Admission granted for exactly one call
///
/// Consumed by the outcome signal. Dropping a permit without a signal
/// releases its resources and records nothing.
pub trait Permit {
    /// The call succeeded
    fn on_success(self);

    /// The call failed in a way that reflects the destination's health
    fn on_failure(self, error: &(dyn StdError + 'static));
}

/// Engine owning per-destination circuit and bulkhead state
pub trait ProtectionEngine: Send + Sync {
    type Permit: Permit;

    /// Admit one call to `identity`, or reject it without waiting
    fn acquire(
        &self,
        identity: &str,
        settings: &ProtectionSettings,
    ) -> Result<Self::Permit, Rejection>;
}

impl<T: ProtectionEngine + ?Sized> ProtectionEngine for std::sync::Arc<T> {
    type Permit = T::Permit;

    fn acquire(
        &self,
        identity: &str,
        settings: &ProtectionSettings,
    ) -> Result<Self::Permit, Rejection> {
        (**self).acquire(identity, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_display() {
        assert_eq!(Rejection::Busy { capacity: 4 }.to_string(), "resource busy (4 concurrent calls)");
        assert_eq!(Rejection::CircuitOpen { retry_after: None }.to_string(), "circuit open");
        assert!(Rejection::CircuitOpen { retry_after: Some(Duration::from_secs(3)) }
            .to_string()
            .contains("retry in 3s"));
    }
}

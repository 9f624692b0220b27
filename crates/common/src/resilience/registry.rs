//! Default protection engine
//!
//! [`ResourceRegistry`] keeps one circuit breaker and one bulkhead per
//! destination identity. Resources are created on first use from the settings
//! supplied with that first call; later calls for the same identity reuse the
//! existing state regardless of the settings they carry.
//!
//! ```rust
//! use floodgate_common::resilience::{Permit, ProtectionEngine, ProtectionSettings, ResourceRegistry};
//!
//! let registry = ResourceRegistry::new();
//! let settings = ProtectionSettings::default().with_bulkhead(Some(1));
//!
//! let permit = registry.acquire("postgresql_db1:5432", &settings).unwrap();
//! assert!(registry.acquire("postgresql_db1:5432", &settings).is_err());
//!
//! permit.on_success();
//! assert!(registry.acquire("postgresql_db1:5432", &settings).is_ok());
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use super::bulkhead::{Bulkhead, BulkheadMetrics, BulkheadPermit};
use super::circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerMetrics, CircuitState, ConfigResult, Outcome,
};
use super::clock::{Clock, SystemClock};
use super::engine::{Permit, ProtectionEngine, Rejection};
use super::settings::ProtectionSettings;

/// Breaker and bulkhead guarding one destination
struct ProtectedResource<C: Clock> {
    settings: ProtectionSettings,
    breaker: Option<CircuitBreaker<C>>,
    bulkhead: Option<Bulkhead>,
}

impl<C: Clock> ProtectedResource<C> {
    fn build(settings: &ProtectionSettings, clock: C) -> ConfigResult<Self> {
        settings.validate()?;

        let breaker = if settings.circuit_breaker {
            Some(CircuitBreaker::with_clock(settings.circuit_breaker_config(), clock)?)
        } else {
            None
        };
        let bulkhead = settings.bulkhead_config().map(Bulkhead::new).transpose()?;

        Ok(Self { settings: settings.clone(), breaker, bulkhead })
    }
}

/// Point-in-time view of one registered destination
#[derive(Debug, Clone)]
pub struct ResourceMetrics {
    pub settings: ProtectionSettings,
    pub circuit: Option<CircuitBreakerMetrics>,
    pub bulkhead: Option<BulkheadMetrics>,
}

/// Identity-keyed registry of circuit breakers and bulkheads
pub struct ResourceRegistry<C: Clock + Clone = SystemClock> {
    resources: DashMap<String, Arc<ProtectedResource<C>>>,
    clock: C,
}

impl<C: Clock + Clone> fmt::Debug for ResourceRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry").field("resources", &self.resources.len()).finish()
    }
}

impl ResourceRegistry<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for ResourceRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> ResourceRegistry<C> {
    /// Registry whose breakers read time from `clock`
    pub fn with_clock(clock: C) -> Self {
        Self { resources: DashMap::new(), clock }
    }

    /// Register `identity` ahead of its first call
    ///
    /// Returns `false` when the identity was already registered; the existing
    /// settings are kept.
    pub fn register(&self, identity: &str, settings: &ProtectionSettings) -> ConfigResult<bool> {
        if self.resources.contains_key(identity) {
            return Ok(false);
        }
        let resource = Arc::new(ProtectedResource::build(settings, self.clock.clone())?);
        let mut inserted = false;
        self.resources.entry(identity.to_string()).or_insert_with(|| {
            inserted = true;
            resource
        });
        if inserted {
            info!(identity, "Registered protected resource");
        }
        Ok(inserted)
    }

    fn resource(
        &self,
        identity: &str,
        settings: &ProtectionSettings,
    ) -> Result<Arc<ProtectedResource<C>>, Rejection> {
        if let Some(existing) = self.resources.get(identity) {
            return Ok(Arc::clone(existing.value()));
        }

        self.register(identity, settings)
            .map_err(|e| Rejection::Misconfigured { message: e.to_string() })?;

        self.resources.get(identity).map(|r| Arc::clone(r.value())).ok_or_else(|| {
            Rejection::Misconfigured { message: format!("resource '{}' vanished", identity) }
        })
    }

    /// Current circuit state, if `identity` is registered with a breaker
    pub fn circuit_state(&self, identity: &str) -> Option<CircuitState> {
        self.resources.get(identity).and_then(|r| r.breaker.as_ref().map(CircuitBreaker::state))
    }

    /// Snapshot of a registered destination
    pub fn metrics(&self, identity: &str) -> Option<ResourceMetrics> {
        self.resources.get(identity).map(|r| ResourceMetrics {
            settings: r.settings.clone(),
            circuit: r.breaker.as_ref().map(CircuitBreaker::metrics),
            bulkhead: r.bulkhead.as_ref().map(Bulkhead::metrics),
        })
    }

    /// Force a destination's circuit closed
    ///
    /// Returns `false` when the identity is unknown.
    pub fn reset(&self, identity: &str) -> bool {
        match self.resources.get(identity) {
            Some(resource) => {
                if let Some(breaker) = &resource.breaker {
                    breaker.reset();
                }
                true
            }
            None => false,
        }
    }

    /// Forget a destination; in-flight permits keep the old state alive
    pub fn unregister(&self, identity: &str) -> bool {
        self.resources.remove(identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl<C: Clock + Clone> ProtectionEngine for ResourceRegistry<C> {
    type Permit = ResourcePermit<C>;

    #[instrument(skip(self, settings))]
    fn acquire(
        &self,
        identity: &str,
        settings: &ProtectionSettings,
    ) -> Result<Self::Permit, Rejection> {
        let resource = self.resource(identity, settings)?;

        let admission = match &resource.breaker {
            Some(breaker) => match breaker.try_acquire() {
                Ok(admission) => Some(admission),
                Err(rejection) => {
                    warn!(identity, %rejection, "Circuit rejected call");
                    return Err(rejection);
                }
            },
            None => None,
        };

        let ticket = match &resource.bulkhead {
            Some(bulkhead) => match bulkhead.try_acquire() {
                Ok(ticket) => Some(ticket),
                Err(rejection) => {
                    // Busy is not a health signal; hand back the breaker slot
                    if let (Some(breaker), Some(admission)) = (&resource.breaker, admission) {
                        breaker.complete(admission, Outcome::Released);
                    }
                    warn!(identity, %rejection, "Bulkhead rejected call");
                    return Err(rejection);
                }
            },
            None => None,
        };

        debug!(identity, ?admission, "Call admitted");
        Ok(ResourcePermit {
            identity: identity.to_string(),
            resource,
            admission,
            _ticket: ticket,
            settled: false,
        })
    }
}

/// Permit handed out by [`ResourceRegistry`]
///
/// Holds the bulkhead ticket until dropped.
pub struct ResourcePermit<C: Clock = SystemClock> {
    identity: String,
    resource: Arc<ProtectedResource<C>>,
    admission: Option<Admission>,
    _ticket: Option<BulkheadPermit>,
    settled: bool,
}

impl<C: Clock> ResourcePermit<C> {
    /// Identity this permit was issued for
    pub fn identity(&self) -> &str {
        &self.identity
    }

    fn settle(&mut self, outcome: Outcome) {
        if self.settled {
            return;
        }
        self.settled = true;
        if let (Some(breaker), Some(admission)) = (&self.resource.breaker, self.admission) {
            breaker.complete(admission, outcome);
        }
    }
}

impl<C: Clock> fmt::Debug for ResourcePermit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePermit")
            .field("identity", &self.identity)
            .field("admission", &self.admission)
            .finish()
    }
}

impl<C: Clock> Permit for ResourcePermit<C> {
    fn on_success(mut self) {
        self.settle(Outcome::Success);
    }

    fn on_failure(mut self, error: &(dyn StdError + 'static)) {
        warn!(identity = %self.identity, error = %error, "Resource failure recorded");
        self.settle(Outcome::Failure);
    }
}

impl<C: Clock> Drop for ResourcePermit<C> {
    fn drop(&mut self) {
        self.settle(Outcome::Released);
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use super::*;
    use crate::resilience::clock::MockClock;

    const DB: &str = "postgresql_db1:5432";

    fn settings() -> ProtectionSettings {
        ProtectionSettings::default()
            .with_failure_threshold(2)
            .with_error_timeout(Duration::from_secs(5))
            .with_bulkhead(Some(2))
    }

    fn fail(registry: &ResourceRegistry<MockClock>) {
        let permit = registry.acquire(DB, &settings()).expect("admitted");
        permit.on_failure(&io::Error::from(io::ErrorKind::ConnectionReset));
    }

    #[test]
    fn test_acquire_registers_on_first_use() {
        let registry = ResourceRegistry::new();
        assert!(registry.is_empty());

        registry.acquire(DB, &settings()).unwrap().on_success();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.circuit_state(DB), Some(CircuitState::Closed));
    }

    /// First settings win for the registry's lifetime
    #[test]
    fn test_first_settings_win() {
        let registry = ResourceRegistry::new();
        registry.acquire(DB, &settings()).unwrap().on_success();

        let other = settings().with_bulkhead(Some(7));
        drop(registry.acquire(DB, &other).unwrap());

        let metrics = registry.metrics(DB).unwrap();
        assert_eq!(metrics.settings.bulkhead, Some(2));
        assert_eq!(metrics.bulkhead.unwrap().max_concurrent, 2);
    }

    #[test]
    fn test_register_returns_false_when_present() {
        let registry = ResourceRegistry::new();
        assert!(registry.register(DB, &settings()).unwrap());
        assert!(!registry.register(DB, &settings()).unwrap());
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let registry = ResourceRegistry::new();
        let bad = settings().with_bulkhead(Some(0));

        assert!(matches!(registry.acquire(DB, &bad), Err(Rejection::Misconfigured { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failures_open_circuit_and_timeout_half_opens() {
        let clock = MockClock::new();
        let registry = ResourceRegistry::with_clock(clock.clone());

        fail(&registry);
        fail(&registry);
        assert_eq!(registry.circuit_state(DB), Some(CircuitState::Open));
        assert!(matches!(registry.acquire(DB, &settings()), Err(Rejection::CircuitOpen { .. })));

        clock.advance(Duration::from_secs(6));
        let trial = registry.acquire(DB, &settings()).expect("trial admitted");
        assert_eq!(registry.circuit_state(DB), Some(CircuitState::HalfOpen));
        trial.on_success();
    }

    /// Busy rejections do not count against the circuit
    #[test]
    fn test_bulkhead_rejection_is_not_a_failure() {
        let registry = ResourceRegistry::new();
        let _a = registry.acquire(DB, &settings()).unwrap();
        let _b = registry.acquire(DB, &settings()).unwrap();

        for _ in 0..5 {
            assert!(matches!(
                registry.acquire(DB, &settings()),
                Err(Rejection::Busy { capacity: 2 })
            ));
        }
        assert_eq!(registry.circuit_state(DB), Some(CircuitState::Closed));
    }

    /// A dropped half-open trial frees the slot without closing or opening
    #[test]
    fn test_dropped_trial_releases_slot() {
        let clock = MockClock::new();
        let registry = ResourceRegistry::with_clock(clock.clone());
        fail(&registry);
        fail(&registry);
        clock.advance(Duration::from_secs(6));

        let trial = registry.acquire(DB, &settings()).unwrap();
        assert!(registry.acquire(DB, &settings()).is_err());
        drop(trial);

        assert_eq!(registry.circuit_state(DB), Some(CircuitState::HalfOpen));
        assert!(registry.acquire(DB, &settings()).is_ok());
    }

    /// Validates that a trial outliving its half-open episode cannot free a
    /// slot held by a trial of the next episode.
    ///
    /// # Test Steps
    /// 1. Admit a slow call while CLOSED, then open the circuit
    /// 2. Half-open and admit trial `t1`
    /// 3. Fail the slow call, re-opening the circuit with `t1` in flight
    /// 4. Half-open again and admit trial `t2`
    /// 5. Drop `t1`; the single trial slot must still be taken by `t2`
    #[test]
    fn test_stale_trial_does_not_free_next_episode_slot() {
        let clock = MockClock::new();
        let registry = ResourceRegistry::with_clock(clock.clone());
        let settings = ProtectionSettings::default()
            .with_failure_threshold(1)
            .with_half_open_max_calls(1)
            .with_error_timeout(Duration::from_secs(10))
            .with_bulkhead(None);
        let broken = io::Error::from(io::ErrorKind::ConnectionReset);

        let slow = registry.acquire(DB, &settings).expect("closed circuit admits");
        registry.acquire(DB, &settings).expect("closed circuit admits").on_failure(&broken);
        assert_eq!(registry.circuit_state(DB), Some(CircuitState::Open));

        clock.advance(Duration::from_secs(11));
        let t1 = registry.acquire(DB, &settings).expect("first episode trial");
        slow.on_failure(&broken);
        assert_eq!(registry.circuit_state(DB), Some(CircuitState::Open));

        clock.advance(Duration::from_secs(11));
        let t2 = registry.acquire(DB, &settings).expect("second episode trial");
        drop(t1);

        assert_eq!(registry.circuit_state(DB), Some(CircuitState::HalfOpen));
        assert!(matches!(
            registry.acquire(DB, &settings),
            Err(Rejection::CircuitOpen { retry_after: None })
        ));

        t2.on_success();
        let circuit = registry.metrics(DB).and_then(|m| m.circuit).expect("breaker enabled");
        assert_eq!(circuit.half_open_calls, 0);
    }

    #[test]
    fn test_disabled_circuit_breaker_never_opens() {
        let registry = ResourceRegistry::new();
        let settings = settings().without_circuit_breaker();

        for _ in 0..5 {
            let permit = registry.acquire(DB, &settings).unwrap();
            permit.on_failure(&io::Error::from(io::ErrorKind::BrokenPipe));
        }

        assert_eq!(registry.circuit_state(DB), None);
        assert!(registry.acquire(DB, &settings).is_ok());
    }

    #[test]
    fn test_reset_and_unregister() {
        let registry = ResourceRegistry::with_clock(MockClock::new());
        fail(&registry);
        fail(&registry);

        assert!(registry.reset(DB));
        assert_eq!(registry.circuit_state(DB), Some(CircuitState::Closed));

        assert!(registry.unregister(DB));
        assert!(!registry.unregister(DB));
        assert!(!registry.reset(DB));
        assert!(registry.metrics(DB).is_none());
    }

    #[test]
    fn test_identities_are_isolated() {
        let registry = ResourceRegistry::with_clock(MockClock::new());
        fail(&registry);
        fail(&registry);

        assert_eq!(registry.circuit_state(DB), Some(CircuitState::Open));
        assert!(registry.acquire("postgresql_db2:5432", &settings()).is_ok());
    }
}

//! Call interception
//!
//! [`ProtectedClient`] decorates a blocking client. Every call passes through
//! [`ProtectedClient::call`], which:
//!
//! 1. classifies the call; cleanup statements go straight to the client
//! 2. resolves the destination identity and settings (once per instance)
//! 3. asks the protection engine for admission, failing fast on rejection
//! 4. runs the call and reports the outcome to the engine
//!
//! Methods the interceptor does not cover stay reachable through `Deref`.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use floodgate_common::resilience::{
    Permit, ProtectionEngine, ProtectionSettings, Rejection, ResourceRegistry,
};
use once_cell::sync::Lazy;
use once_cell::unsync::OnceCell;
use tracing::{debug, instrument, warn};

use crate::classifier::{self, CallRecord, Decision};
use crate::config::ConfigurationResolver;
use crate::errors::{ClassifyError, GuardError};
use crate::identity::{ConnectionParameters, IdentityDefaults, ResourceId};

/// Default engine handle shared by wrappers that are not given one
pub type SharedRegistry = Arc<ResourceRegistry>;

static SHARED_REGISTRY: Lazy<SharedRegistry> = Lazy::new(|| Arc::new(ResourceRegistry::new()));

/// Process-wide registry used by [`ProtectedClient::builder`]
pub fn shared_registry() -> SharedRegistry {
    Arc::clone(&SHARED_REGISTRY)
}

/// Capabilities the interceptor needs from a wrapped client
pub trait Client {
    type Output;
    type Error: ClassifyError;

    /// Prefix of every identity derived for this client type
    const RESOURCE_KIND: &'static str;

    /// Port assumed when the client reports none
    const DEFAULT_PORT: u16;

    /// Perform the call without any protection
    fn raw_call(&mut self, call: &CallRecord<'_>) -> Result<Self::Output, Self::Error>;

    fn connection_parameters(&self) -> ConnectionParameters;
}

/// Client decorated with circuit breaker and bulkhead protection
///
/// Identity and settings are resolved on the first protected call and kept
/// for the wrapper's lifetime. The wrapper is `Send` but not `Sync`.
pub struct ProtectedClient<C: Client, E: ProtectionEngine = SharedRegistry> {
    inner: C,
    engine: E,
    resolver: Arc<ConfigurationResolver>,
    name: Option<String>,
    defaults: IdentityDefaults,
    identity: OnceCell<ResourceId>,
    settings: OnceCell<ProtectionSettings>,
}

impl<C: Client> ProtectedClient<C> {
    /// Builder using the global resolver and the shared registry
    pub fn builder(client: C) -> ProtectedClientBuilder<C> {
        ProtectedClientBuilder {
            inner: client,
            engine: shared_registry(),
            resolver: None,
            name: None,
            defaults: None,
        }
    }
}

impl<C: Client, E: ProtectionEngine> ProtectedClient<C, E> {
    /// Wrap `client` with an explicit engine and resolver
    pub fn new(client: C, engine: E, resolver: Arc<ConfigurationResolver>) -> Self {
        Self {
            inner: client,
            engine,
            resolver,
            name: None,
            defaults: IdentityDefaults::localhost(C::DEFAULT_PORT),
            identity: OnceCell::new(),
            settings: OnceCell::new(),
        }
    }

    /// Settings for this destination, looked up once
    pub fn settings(&self) -> &ProtectionSettings {
        self.settings.get_or_init(|| {
            let params = self.inner.connection_parameters();
            match self.resolver.lookup(params.host.as_deref(), params.port) {
                Some(settings) => settings,
                None => {
                    debug!(
                        host = ?params.host,
                        port = ?params.port,
                        "No settings override, using defaults"
                    );
                    ProtectionSettings::default()
                }
            }
        })
    }

    /// Identity of this destination, derived once
    pub fn identity(&self) -> &ResourceId {
        self.identity.get_or_init(|| {
            let explicit = self.name.as_deref().or(self.settings().name.as_deref());
            let identity = ResourceId::resolve(
                C::RESOURCE_KIND,
                &self.inner.connection_parameters(),
                explicit,
                &self.defaults,
            );
            debug!(%identity, "Resolved destination identity");
            identity
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn get_ref(&self) -> &C {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Run one call through classification and protection
    #[instrument(skip_all, fields(kind = ?call.kind()))]
    pub fn call(&mut self, call: &CallRecord<'_>) -> Result<C::Output, GuardError<C::Error>> {
        if classifier::classify(call) == Decision::Bypass {
            debug!("Cleanup statement bypasses protection");
            return self.inner.raw_call(call).map_err(GuardError::Client);
        }

        let permit = self.admit()?;

        match self.inner.raw_call(call) {
            Ok(output) => {
                permit.on_success();
                Ok(output)
            }
            Err(error) => {
                let kind = error.error_kind();
                if !kind.is_resource_failure() {
                    // Not a health signal; the permit is released on drop
                    drop(permit);
                    return Err(GuardError::Client(error));
                }

                permit.on_failure(&error);
                let identity = self.identity().clone();
                warn!(%identity, %kind, %error, "Resource failure");
                Err(GuardError::ResourceFailure { identity, kind, source: error })
            }
        }
    }

    fn admit(&self) -> Result<E::Permit, GuardError<C::Error>> {
        let identity = self.identity();
        self.engine.acquire(identity.as_str(), self.settings()).map_err(|rejection| {
            warn!(%identity, %rejection, "Call rejected");
            let identity = identity.clone();
            match rejection {
                Rejection::Busy { capacity } => GuardError::ResourceBusy { identity, capacity },
                Rejection::CircuitOpen { retry_after } => {
                    GuardError::CircuitOpen { identity, retry_after }
                }
                Rejection::Misconfigured { message } => {
                    GuardError::InvalidSettings { identity, message }
                }
            }
        })
    }
}

impl<C: Client, E: ProtectionEngine> Deref for ProtectedClient<C, E> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

impl<C: Client, E: ProtectionEngine> DerefMut for ProtectedClient<C, E> {
    fn deref_mut(&mut self) -> &mut C {
        &mut self.inner
    }
}

impl<C, E> fmt::Debug for ProtectedClient<C, E>
where
    C: Client + fmt::Debug,
    E: ProtectionEngine,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedClient")
            .field("inner", &self.inner)
            .field("identity", &self.identity.get())
            .finish_non_exhaustive()
    }
}

/// Builder for [`ProtectedClient`]
pub struct ProtectedClientBuilder<C: Client, E: ProtectionEngine = SharedRegistry> {
    inner: C,
    engine: E,
    resolver: Option<Arc<ConfigurationResolver>>,
    name: Option<String>,
    defaults: Option<IdentityDefaults>,
}

impl<C: Client, E: ProtectionEngine> ProtectedClientBuilder<C, E> {
    /// Use `engine` instead of the shared registry
    pub fn engine<E2: ProtectionEngine>(self, engine: E2) -> ProtectedClientBuilder<C, E2> {
        ProtectedClientBuilder {
            inner: self.inner,
            engine,
            resolver: self.resolver,
            name: self.name,
            defaults: self.defaults,
        }
    }

    /// Use `resolver` instead of the global one
    pub fn resolver(mut self, resolver: Arc<ConfigurationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Explicit resource name; takes precedence over a resolved `name`
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Fallback host and port for identity synthesis
    pub fn defaults(mut self, defaults: IdentityDefaults) -> Self {
        self.defaults = Some(defaults);
        self
    }

    pub fn build(self) -> ProtectedClient<C, E> {
        let resolver = self.resolver.unwrap_or_else(ConfigurationResolver::global);
        let mut client = ProtectedClient::new(self.inner, self.engine, resolver);
        client.name = self.name;
        if let Some(defaults) = self.defaults {
            client.defaults = defaults;
        }
        client
    }
}

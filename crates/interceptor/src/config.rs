//! Write-once protection configuration resolver
//!
//! A [`ConfigurationResolver`] holds at most one resolver function mapping a
//! destination's host and port to [`ProtectionSettings`]. Installing a second
//! function fails; the first stays active for the resolver's lifetime.

use std::fmt;
use std::sync::Arc;

use floodgate_common::resilience::ProtectionSettings;
use floodgate_common::{CommonError, ErrorClassification, ErrorSeverity};
use once_cell::sync::{Lazy, OnceCell};
use thiserror::Error;
use tracing::info;

/// Function resolving settings for `(host, port)`; `None` means defaults apply
pub type ResolverFn = dyn Fn(Option<&str>, Option<u16>) -> Option<ProtectionSettings> + Send + Sync;

/// A resolver function was already installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("protection configuration resolver is already set")]
pub struct ConfigurationAlreadySet;

impl ErrorClassification for ConfigurationAlreadySet {
    fn is_retryable(&self) -> bool {
        false
    }

    fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Error
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<std::time::Duration> {
        None
    }
}

impl From<ConfigurationAlreadySet> for CommonError {
    fn from(err: ConfigurationAlreadySet) -> Self {
        CommonError::config_field("resolver", err.to_string())
    }
}

static GLOBAL: Lazy<Arc<ConfigurationResolver>> =
    Lazy::new(|| Arc::new(ConfigurationResolver::new()));

/// Write-once holder for a resolver function
#[derive(Default)]
pub struct ConfigurationResolver {
    resolver: OnceCell<Box<ResolverFn>>,
}

impl fmt::Debug for ConfigurationResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationResolver").field("installed", &self.is_installed()).finish()
    }
}

impl ConfigurationResolver {
    /// Resolver with nothing installed
    pub const fn new() -> Self {
        Self { resolver: OnceCell::new() }
    }

    /// Resolver with `resolver` already installed
    pub fn with_resolver<F>(resolver: F) -> Self
    where
        F: Fn(Option<&str>, Option<u16>) -> Option<ProtectionSettings> + Send + Sync + 'static,
    {
        Self { resolver: OnceCell::with_value(Box::new(resolver) as Box<ResolverFn>) }
    }

    /// Process-wide resolver shared by wrappers that are not given one
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Install the resolver function
    ///
    /// Exactly one install succeeds, even when several threads race.
    pub fn install<F>(&self, resolver: F) -> Result<(), ConfigurationAlreadySet>
    where
        F: Fn(Option<&str>, Option<u16>) -> Option<ProtectionSettings> + Send + Sync + 'static,
    {
        self.resolver.set(Box::new(resolver)).map_err(|_| ConfigurationAlreadySet)?;
        info!("Protection configuration resolver installed");
        Ok(())
    }

    /// Alias of [`install`](Self::install)
    pub fn set_resolver<F>(&self, resolver: F) -> Result<(), ConfigurationAlreadySet>
    where
        F: Fn(Option<&str>, Option<u16>) -> Option<ProtectionSettings> + Send + Sync + 'static,
    {
        self.install(resolver)
    }

    /// Settings for `(host, port)`, or `None` when no resolver is installed
    /// or the resolver has no override
    pub fn lookup(&self, host: Option<&str>, port: Option<u16>) -> Option<ProtectionSettings> {
        self.resolver.get().and_then(|resolve| resolve(host, port))
    }

    /// Alias of [`lookup`](Self::lookup)
    pub fn get_configuration(
        &self,
        host: Option<&str>,
        port: Option<u16>,
    ) -> Option<ProtectionSettings> {
        self.lookup(host, port)
    }

    pub fn is_installed(&self) -> bool {
        self.resolver.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;

    #[test]
    fn test_lookup_without_resolver_is_none() {
        let resolver = ConfigurationResolver::new();
        assert!(!resolver.is_installed());
        assert_eq!(resolver.lookup(Some("db1"), Some(5432)), None);
    }

    #[test]
    fn test_install_then_lookup() {
        let resolver = ConfigurationResolver::new();
        resolver
            .install(|host, _port| {
                (host == Some("db1")).then(|| ProtectionSettings::default().with_bulkhead(Some(2)))
            })
            .unwrap();

        assert!(resolver.is_installed());
        assert_eq!(resolver.lookup(Some("db1"), Some(5432)).unwrap().bulkhead, Some(2));
        assert_eq!(resolver.get_configuration(Some("db2"), None), None);
    }

    /// Second install fails and the first resolver stays active
    #[test]
    fn test_second_install_fails() {
        let resolver = ConfigurationResolver::with_resolver(|_, _| {
            Some(ProtectionSettings::default().with_name("first"))
        });

        let err = resolver
            .set_resolver(|_, _| Some(ProtectionSettings::default().with_name("second")))
            .unwrap_err();

        assert_eq!(err, ConfigurationAlreadySet);
        assert!(!err.is_retryable());
        assert_eq!(resolver.lookup(None, None).unwrap().name.as_deref(), Some("first"));
    }

    #[test]
    fn test_racing_installs_have_one_winner() {
        let resolver = Arc::new(ConfigurationResolver::new());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let resolver = Arc::clone(&resolver);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let name = i.to_string();
                    resolver
                        .install(move |_, _| Some(ProtectionSettings::default().with_name(&name)))
                        .is_ok()
                })
            })
            .collect();

        let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count();
        assert_eq!(winners, 1);
        assert!(resolver.lookup(None, None).is_some());
    }

    #[test]
    fn test_already_set_converts_to_config_error() {
        let err: CommonError = ConfigurationAlreadySet.into();
        assert!(err.to_string().contains("resolver"));
        assert_eq!(err.error_type_name(), "config");
    }
}

//! Destination identity resolution
//!
//! A [`ResourceId`] keys circuit and bulkhead state. It is rendered as
//! `<kind>_<name>`, where `name` is an explicit resource name when one is
//! configured and `host:port` otherwise.

use std::borrow::Cow;
use std::fmt;

/// Host and port a client is connected (or configured) to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParameters {
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ConnectionParameters {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: Some(host.into()), port: Some(port) }
    }
}

/// Fallbacks used when a client reports no host or port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityDefaults {
    pub host: Cow<'static, str>,
    pub port: u16,
}

impl IdentityDefaults {
    /// `localhost` with the given port
    pub const fn localhost(port: u16) -> Self {
        Self { host: Cow::Borrowed("localhost"), port }
    }

    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: Cow::Owned(host.into()), port }
    }
}

/// Stable key for one logical destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    /// Identity for `name` namespaced by `kind`
    pub fn new(kind: &str, name: &str) -> Self {
        Self(format!("{}_{}", kind, name))
    }

    /// Derive the identity for a client
    ///
    /// `explicit_name` wins when present; otherwise the name is synthesized
    /// from `params`, with missing parts taken from `defaults`.
    pub fn resolve(
        kind: &str,
        params: &ConnectionParameters,
        explicit_name: Option<&str>,
        defaults: &IdentityDefaults,
    ) -> Self {
        match explicit_name {
            Some(name) => Self::new(kind, name),
            None => {
                let host = params.host.as_deref().unwrap_or(&defaults.host);
                let port = params.port.unwrap_or(defaults.port);
                Self::new(kind, &format!("{}:{}", host, port))
            }
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

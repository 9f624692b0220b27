//! Circuit breaker and bulkhead interception for blocking network clients.
//!
//! Wrap a client in [`ProtectedClient`] and route calls through
//! [`ProtectedClient::call`]. Each destination gets its own circuit and
//! bulkhead, keyed by a [`ResourceId`] such as `postgresql_db1:5432`.
//!
//! # Modules
//!
//! - [`identity`]: destination identity derivation
//! - [`config`]: write-once configuration resolver
//! - [`classifier`]: cleanup statements that bypass protection
//! - [`errors`]: error kinds and [`GuardError`]
//! - [`interceptor`]: the [`ProtectedClient`] decorator
//! - [`settings`]: TOML-backed resolver
//! - `postgres` (feature `postgres`): blocking PostgreSQL client
//!
//! # Example
//!
//! ```rust
//! use std::io;
//! use std::sync::Arc;
//!
//! use floodgate_common::resilience::ResourceRegistry;
//! use floodgate_interceptor::{
//!     CallRecord, Client, ConfigurationResolver, ConnectionParameters, ProtectedClient,
//! };
//!
//! struct Echo;
//!
//! impl Client for Echo {
//!     type Output = usize;
//!     type Error = io::Error;
//!
//!     const RESOURCE_KIND: &'static str = "echo";
//!     const DEFAULT_PORT: u16 = 7;
//!
//!     fn raw_call(&mut self, call: &CallRecord<'_>) -> io::Result<usize> {
//!         Ok(call.payload().len())
//!     }
//!
//!     fn connection_parameters(&self) -> ConnectionParameters {
//!         ConnectionParameters::new("echo.local", 7)
//!     }
//! }
//!
//! let mut client = ProtectedClient::builder(Echo)
//!     .engine(Arc::new(ResourceRegistry::new()))
//!     .resolver(Arc::new(ConfigurationResolver::new()))
//!     .build();
//!
//! assert_eq!(client.call(&CallRecord::query("SELECT 1")).unwrap(), 8);
//! assert_eq!(client.identity().as_str(), "echo_echo.local:7");
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod classifier;
pub mod config;
pub mod errors;
pub mod identity;
pub mod interceptor;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod settings;

pub use classifier::{classify, is_whitelisted, CallKind, CallRecord, Decision};
pub use config::{ConfigurationAlreadySet, ConfigurationResolver, ResolverFn};
pub use errors::{io_error_kind, ClassifyError, ErrorKind, GuardError};
pub use identity::{ConnectionParameters, IdentityDefaults, ResourceId};
pub use interceptor::{
    shared_registry, Client, ProtectedClient, ProtectedClientBuilder, SharedRegistry,
};
#[cfg(feature = "postgres")]
pub use postgres::{protect, PgClient, PgError};
pub use settings::{SettingsError, StaticResolver, CONFIG_ENV_VAR};

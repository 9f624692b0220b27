//! Settings file loader
//!
//! Builds a resolver function from a TOML document:
//!
//! ```toml
//! [defaults]
//! failure_threshold = 3
//! error_timeout_ms = 10000
//! bulkhead = 8
//!
//! [[destination]]
//! host = "db-primary"
//! port = 5432
//! name = "primary"
//! failure_threshold = 5
//! ```
//!
//! ## Lookup Order
//! 1. Destination entry matching both host and port
//! 2. Destination entry matching the host and declaring no port
//! 3. `[defaults]`
//! 4. No override
//!
//! Destination entries inherit every field they leave out from `[defaults]`.
//!
//! ## Environment Variables
//! - `FLOODGATE_CONFIG`: path of the settings file read by
//!   [`StaticResolver::from_env`]

use std::fs;
use std::path::{Path, PathBuf};

use floodgate_common::resilience::ProtectionSettings;
use floodgate_common::CommonError;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigurationAlreadySet, ConfigurationResolver};

/// Environment variable naming the settings file
pub const CONFIG_ENV_VAR: &str = "FLOODGATE_CONFIG";

/// Errors raised while loading a settings file
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid settings for {context}: {message}")]
    Invalid { context: String, message: String },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}

impl From<SettingsError> for CommonError {
    fn from(err: SettingsError) -> Self {
        match err {
            SettingsError::Io { path, source } => CommonError::Persistence {
                message: source.to_string(),
                operation: Some(format!("read {}", path.display())),
            },
            SettingsError::Invalid { context, message } => {
                CommonError::config_field(context, message)
            }
            other => CommonError::config(other.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    defaults: Option<toml::Table>,
    #[serde(default, rename = "destination")]
    destinations: Vec<toml::Table>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Destination {
    host: String,
    port: Option<u16>,
    settings: ProtectionSettings,
}

/// Resolver backed by a static table of destinations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticResolver {
    defaults: Option<ProtectionSettings>,
    destinations: Vec<Destination>,
}

impl StaticResolver {
    /// Parse a TOML settings document
    pub fn from_toml_str(source: &str) -> Result<Self, SettingsError> {
        let file: SettingsFile = toml::from_str(source)?;

        let defaults = file
            .defaults
            .clone()
            .map(|table| parse_settings(table, "defaults"))
            .transpose()?;

        let mut destinations = Vec::with_capacity(file.destinations.len());
        for (index, mut table) in file.destinations.into_iter().enumerate() {
            let context = format!("destination[{}]", index);

            let host = match table.remove("host") {
                Some(toml::Value::String(host)) => host,
                Some(_) => return Err(invalid(&context, "host must be a string")),
                None => return Err(invalid(&context, "host is required")),
            };
            let port = match table.remove("port") {
                Some(toml::Value::Integer(port)) => Some(
                    u16::try_from(port)
                        .map_err(|_| invalid(&context, "port must be between 0 and 65535"))?,
                ),
                Some(_) => return Err(invalid(&context, "port must be an integer")),
                None => None,
            };

            let mut merged = file.defaults.clone().unwrap_or_default();
            for (key, value) in table {
                merged.insert(key, value);
            }
            let settings = parse_settings(merged, &context)?;

            destinations.push(Destination { host, port, settings });
        }

        info!(destinations = destinations.len(), "Loaded protection settings");
        Ok(Self { defaults, destinations })
    }

    /// Read and parse a settings file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;
        debug!(path = %path.display(), "Read settings file");
        Self::from_toml_str(&source)
    }

    /// Read the settings file named by `FLOODGATE_CONFIG`
    pub fn from_env() -> Result<Self, SettingsError> {
        let path =
            std::env::var_os(CONFIG_ENV_VAR).ok_or(SettingsError::MissingEnv(CONFIG_ENV_VAR))?;
        Self::from_path(path)
    }

    /// Settings for `(host, port)`
    pub fn lookup(&self, host: Option<&str>, port: Option<u16>) -> Option<ProtectionSettings> {
        let host_matches = |d: &&Destination| Some(d.host.as_str()) == host;

        self.destinations
            .iter()
            .filter(host_matches)
            .find(|d| port.is_some() && d.port == port)
            .or_else(|| self.destinations.iter().filter(host_matches).find(|d| d.port.is_none()))
            .map(|d| d.settings.clone())
            .or_else(|| self.defaults.clone())
    }

    /// Install this table as `resolver`'s function
    pub fn install(self, resolver: &ConfigurationResolver) -> Result<(), ConfigurationAlreadySet> {
        resolver.install(move |host, port| self.lookup(host, port))
    }

    pub fn is_empty(&self) -> bool {
        self.defaults.is_none() && self.destinations.is_empty()
    }
}

fn invalid(context: &str, message: &str) -> SettingsError {
    SettingsError::Invalid { context: context.to_string(), message: message.to_string() }
}

fn parse_settings(table: toml::Table, context: &str) -> Result<ProtectionSettings, SettingsError> {
    let settings: ProtectionSettings = toml::Value::Table(table).try_into()?;
    settings.validate().map_err(|e| invalid(context, &e.to_string()))?;
    Ok(settings)
}

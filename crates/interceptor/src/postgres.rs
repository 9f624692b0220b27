//! Blocking PostgreSQL client
//!
//! [`PgClient`] drives a `tokio-postgres` connection on a private
//! current-thread runtime, so every call blocks the caller until the server
//! answers. The connection task only makes progress while a call is in
//! flight.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::str::Utf8Error;

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::config::Host;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use tracing::{debug, instrument, warn};

use crate::classifier::{CallKind, CallRecord};
use crate::errors::{io_error_kind, ClassifyError, ErrorKind};
use crate::identity::ConnectionParameters;
use crate::interceptor::{Client, ProtectedClient};

/// Identity prefix for PostgreSQL destinations
pub const RESOURCE_KIND: &str = "postgresql";

/// Port PostgreSQL listens on by default
pub const DEFAULT_PORT: u16 = 5432;

/// Errors raised by [`PgClient`]
#[derive(Debug, Error)]
pub enum PgError {
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error("failed to start client runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("statement is not valid UTF-8: {0}")]
    InvalidPayload(#[from] Utf8Error),
}

impl ClassifyError for tokio_postgres::Error {
    fn error_kind(&self) -> ErrorKind {
        if self.is_closed() {
            return ErrorKind::ConnectionBad;
        }

        if let Some(code) = self.code() {
            return if *code == SqlState::QUERY_CANCELED {
                ErrorKind::QueryCanceled
            } else if code.code().starts_with("08") {
                ErrorKind::ConnectionBad
            } else {
                ErrorKind::Other
            };
        }

        match self.source().and_then(|source| source.downcast_ref::<io::Error>()) {
            Some(io_error) => io_error_kind(io_error.kind()),
            None => ErrorKind::Other,
        }
    }
}

impl ClassifyError for PgError {
    fn error_kind(&self) -> ErrorKind {
        match self {
            PgError::Postgres(error) => error.error_kind(),
            PgError::Runtime(error) => error.error_kind(),
            PgError::InvalidPayload(_) => ErrorKind::Other,
        }
    }
}

/// Blocking PostgreSQL connection
pub struct PgClient {
    client: tokio_postgres::Client,
    config: Config,
    runtime: Runtime,
}

impl fmt::Debug for PgClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgClient")
            .field("params", &self.connection_parameters())
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

impl PgClient {
    /// Connect using a libpq-style connection string or URL
    #[instrument(skip(params))]
    pub fn connect(params: &str) -> Result<Self, PgError> {
        let config: Config = params.parse()?;
        Self::connect_with(config)
    }

    /// Connect using a prepared configuration
    pub fn connect_with(config: Config) -> Result<Self, PgError> {
        let runtime =
            Builder::new_current_thread().enable_all().build().map_err(PgError::Runtime)?;

        let (client, connection) = runtime.block_on(config.connect(NoTls))?;
        runtime.spawn(async move {
            if let Err(error) = connection.await {
                warn!(%error, "PostgreSQL connection closed with error");
            }
        });

        debug!(hosts = config.get_hosts().len(), "Connected to PostgreSQL");
        Ok(Self { client, config, runtime })
    }

    /// Run statements for their side effects
    pub fn batch_execute(&self, sql: &str) -> Result<(), PgError> {
        self.runtime.block_on(self.client.batch_execute(sql)).map_err(PgError::from)
    }

    /// Run statements with the simple query protocol
    pub fn simple_query(&self, sql: &str) -> Result<Vec<SimpleQueryMessage>, PgError> {
        self.runtime.block_on(self.client.simple_query(sql)).map_err(PgError::from)
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Client for PgClient {
    type Output = Vec<SimpleQueryMessage>;
    type Error = PgError;

    const RESOURCE_KIND: &'static str = RESOURCE_KIND;
    const DEFAULT_PORT: u16 = DEFAULT_PORT;

    fn raw_call(&mut self, call: &CallRecord<'_>) -> Result<Self::Output, Self::Error> {
        let sql = call.text()?;
        match call.kind() {
            CallKind::Execute => self.batch_execute(sql).map(|()| Vec::new()),
            CallKind::Query => self.simple_query(sql),
        }
    }

    fn connection_parameters(&self) -> ConnectionParameters {
        let host = self.config.get_hosts().iter().find_map(|host| match host {
            Host::Tcp(name) => Some(name.clone()),
            #[allow(unreachable_patterns)]
            _ => None,
        });
        ConnectionParameters { host, port: self.config.get_ports().first().copied() }
    }
}

/// Wrap `client` using the global resolver and the shared registry
pub fn protect(client: PgClient) -> ProtectedClient<PgClient> {
    ProtectedClient::builder(client).build()
}

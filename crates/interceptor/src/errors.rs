//! Error classification and the interceptor's error type
//!
//! Only connectivity-class failures say something about a destination's
//! health. Those are reported to the protection engine and returned with the
//! destination identity attached; everything else is returned untouched.

use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::time::Duration;

use floodgate_common::{CommonError, ErrorClassification, ErrorSeverity};
use thiserror::Error;

use crate::identity::ResourceId;

/// Broad category of a client error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The connection is broken or could not be established
    ConnectionBad,
    /// The request could not be written to the server
    UnableToSend,
    /// The server or the transport cancelled the request
    QueryCanceled,
    /// Anything else, such as syntax errors or constraint violations
    Other,
}

impl ErrorKind {
    /// Whether errors of this kind count against the destination
    pub fn is_resource_failure(self) -> bool {
        !matches!(self, ErrorKind::Other)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ConnectionBad => write!(f, "connection_bad"),
            ErrorKind::UnableToSend => write!(f, "unable_to_send"),
            ErrorKind::QueryCanceled => write!(f, "query_canceled"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}

/// Errors that can be sorted into an [`ErrorKind`]
pub trait ClassifyError: StdError + 'static {
    fn error_kind(&self) -> ErrorKind;
}

/// Kind for an I/O error kind
///
/// `Interrupted` is a local signal to retry the syscall and says nothing
/// about the destination, so it maps to [`ErrorKind::Other`].
pub fn io_error_kind(kind: io::ErrorKind) -> ErrorKind {
    match kind {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof => ErrorKind::ConnectionBad,
        io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero => ErrorKind::UnableToSend,
        io::ErrorKind::TimedOut => ErrorKind::QueryCanceled,
        _ => ErrorKind::Other,
    }
}

impl ClassifyError for io::Error {
    fn error_kind(&self) -> ErrorKind {
        io_error_kind(self.kind())
    }
}

/// Error returned by a protected call
#[derive(Debug, Error)]
pub enum GuardError<E>
where
    E: StdError + 'static,
{
    /// Every bulkhead ticket for the destination is in use
    #[error("resource {identity} busy ({capacity} concurrent calls)")]
    ResourceBusy { identity: ResourceId, capacity: usize },

    /// The destination's circuit is open
    #[error("circuit open for {identity}")]
    CircuitOpen { identity: ResourceId, retry_after: Option<Duration> },

    /// Connectivity failure, reported to the protection engine
    #[error("{source} [{identity}]")]
    ResourceFailure {
        identity: ResourceId,
        kind: ErrorKind,
        #[source]
        source: E,
    },

    /// Settings for the destination were rejected by the engine
    #[error("invalid protection settings for {identity}: {message}")]
    InvalidSettings { identity: ResourceId, message: String },

    /// Any other client error, returned unchanged
    #[error(transparent)]
    Client(E),
}

impl<E: StdError + 'static> GuardError<E> {
    /// Identity of the destination, when the error is tied to one
    pub fn identity(&self) -> Option<&ResourceId> {
        match self {
            Self::ResourceBusy { identity, .. }
            | Self::CircuitOpen { identity, .. }
            | Self::ResourceFailure { identity, .. }
            | Self::InvalidSettings { identity, .. } => Some(identity),
            Self::Client(_) => None,
        }
    }

    /// Whether the call was shed without reaching the client
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ResourceBusy { .. } | Self::CircuitOpen { .. })
    }

    pub fn is_resource_failure(&self) -> bool {
        matches!(self, Self::ResourceFailure { .. })
    }

    /// Borrow the underlying client error, if the client was called
    pub fn client_error(&self) -> Option<&E> {
        match self {
            Self::ResourceFailure { source, .. } | Self::Client(source) => Some(source),
            _ => None,
        }
    }

    /// Recover the underlying client error, if the client was called
    pub fn into_client_error(self) -> Option<E> {
        match self {
            Self::ResourceFailure { source, .. } | Self::Client(source) => Some(source),
            _ => None,
        }
    }
}

impl<E: StdError + 'static> ErrorClassification for GuardError<E> {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceBusy { .. } | Self::CircuitOpen { .. } | Self::ResourceFailure { .. }
        )
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::ResourceBusy { .. } | Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::ResourceFailure { .. } | Self::InvalidSettings { .. } | Self::Client(_) => {
                ErrorSeverity::Error
            }
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl<E: StdError + 'static> From<GuardError<E>> for CommonError {
    fn from(err: GuardError<E>) -> Self {
        match err {
            GuardError::ResourceBusy { identity, capacity } => {
                CommonError::resource_busy(identity, Some(capacity))
            }
            GuardError::CircuitOpen { identity, retry_after: Some(retry) } => {
                CommonError::circuit_breaker_with_retry(identity, retry)
            }
            GuardError::CircuitOpen { identity, retry_after: None } => {
                CommonError::circuit_breaker(identity)
            }
            GuardError::ResourceFailure { identity, source, .. } => {
                CommonError::backend(identity, source.to_string(), true)
            }
            GuardError::InvalidSettings { identity, message } => {
                CommonError::config_field(identity, message)
            }
            GuardError::Client(source) => CommonError::backend("client", source.to_string(), false),
        }
    }
}

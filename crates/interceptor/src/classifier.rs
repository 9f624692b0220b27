//! Bypass classification for outgoing calls
//!
//! Transaction cleanup statements must always reach the server, even while a
//! destination's circuit is open. Anything else goes through protection.
//! Payloads that are not valid UTF-8 are never bypassed.

use std::str;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

// ASCII whitespace and ASCII case folding only
static BYPASS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i-u)\A\s*(?:ROLLBACK|COMMIT|RELEASE\s+SAVEPOINT)")
        .expect("BYPASS_REGEX should compile - this is a bug")
});

/// Which client entry point a call goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Statement run for its rows
    Query,
    /// Statement run for its side effects
    Execute,
}

/// One outgoing call as seen by the interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRecord<'a> {
    payload: &'a [u8],
    kind: CallKind,
}

impl<'a> CallRecord<'a> {
    pub fn new(payload: &'a [u8], kind: CallKind) -> Self {
        Self { payload, kind }
    }

    pub fn query(sql: &'a str) -> Self {
        Self::new(sql.as_bytes(), CallKind::Query)
    }

    pub fn execute(sql: &'a str) -> Self {
        Self::new(sql.as_bytes(), CallKind::Execute)
    }

    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    /// Payload as text, if it is valid UTF-8
    pub fn text(&self) -> Result<&'a str, str::Utf8Error> {
        str::from_utf8(self.payload)
    }
}

/// Classifier verdict for one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the call directly, without touching the protection engine
    Bypass,
    /// Run the call under circuit breaker and bulkhead protection
    Protect,
}

/// Whether `sql` starts with a cleanup statement
pub fn is_whitelisted(sql: &str) -> bool {
    BYPASS_REGEX.is_match(sql)
}

/// Classify a call
pub fn classify(call: &CallRecord<'_>) -> Decision {
    match call.text() {
        Ok(sql) if is_whitelisted(sql) => {
            debug!(kind = ?call.kind(), "Bypassing protection for cleanup statement");
            Decision::Bypass
        }
        Ok(_) => Decision::Protect,
        Err(error) => {
            debug!(%error, "Payload is not valid UTF-8, protecting");
            Decision::Protect
        }
    }
}

//! Integration tests for the PostgreSQL binding.
//!
//! Live tests need a reachable server and read its connection string from
//! `FLOODGATE_TEST_PG_URL`; run them with `--ignored`.

use std::io;
use std::sync::Arc;

use floodgate_common::resilience::{
    CircuitState, Permit, ProtectionEngine, ProtectionSettings, ResourceRegistry,
};
use floodgate_interceptor::{
    CallRecord, ClassifyError, Client, ConfigurationResolver, ErrorKind, GuardError, PgClient,
    ProtectedClient,
};
use tokio_postgres::SimpleQueryMessage;

fn live_client() -> PgClient {
    let url = std::env::var("FLOODGATE_TEST_PG_URL").expect("FLOODGATE_TEST_PG_URL must be set");
    PgClient::connect(&url).expect("Should connect to test server")
}

fn wrap(client: PgClient) -> ProtectedClient<PgClient, Arc<ResourceRegistry>> {
    ProtectedClient::builder(client)
        .engine(Arc::new(ResourceRegistry::new()))
        .resolver(Arc::new(ConfigurationResolver::new()))
        .build()
}

/// Connection failures are connectivity-class errors
#[test]
fn refused_connection_is_resource_failure() {
    let err = PgClient::connect("host=127.0.0.1 port=1 user=floodgate connect_timeout=2")
        .expect_err("nothing listens on port 1");

    assert_eq!(err.error_kind(), ErrorKind::ConnectionBad);
}

#[test]
#[ignore = "requires FLOODGATE_TEST_PG_URL"]
fn live_query_and_identity() {
    let mut client = wrap(live_client());

    let rows = client.call(&CallRecord::query("SELECT 1 AS one")).expect("query succeeds");
    let values: Vec<_> = rows
        .iter()
        .filter_map(|message| match message {
            SimpleQueryMessage::Row(row) => row.get(0).map(str::to_string),
            _ => None,
        })
        .collect();
    assert_eq!(values, vec!["1".to_string()]);

    let params = client.connection_parameters();
    let expected = format!(
        "postgresql_{}:{}",
        params.host.as_deref().unwrap_or("localhost"),
        params.port.unwrap_or(5432)
    );
    assert_eq!(client.identity().as_str(), expected);
}

/// Syntax errors are client errors and never touch the circuit
#[test]
#[ignore = "requires FLOODGATE_TEST_PG_URL"]
fn live_syntax_error_passes_through() {
    let registry = Arc::new(ResourceRegistry::new());
    let mut client = ProtectedClient::builder(live_client())
        .engine(Arc::clone(&registry))
        .resolver(Arc::new(ConfigurationResolver::new()))
        .build();

    for _ in 0..5 {
        let err = client.call(&CallRecord::query("SELEC 1")).err().expect("syntax error");
        assert!(matches!(err, GuardError::Client(_)));
    }

    let identity = client.identity().clone();
    assert_eq!(registry.circuit_state(identity.as_str()), Some(CircuitState::Closed));
}

/// A cancelled statement counts against the destination
#[test]
#[ignore = "requires FLOODGATE_TEST_PG_URL"]
fn live_statement_timeout_is_query_canceled() {
    let mut client = wrap(live_client());

    client
        .call(&CallRecord::execute("SET statement_timeout = 50"))
        .expect("setting applies");
    let err = client.call(&CallRecord::query("SELECT pg_sleep(1)")).err().expect("cancelled");

    assert!(matches!(err, GuardError::ResourceFailure { kind: ErrorKind::QueryCanceled, .. }));
}

/// Cleanup statements run even with the circuit forced open
#[test]
#[ignore = "requires FLOODGATE_TEST_PG_URL"]
fn live_rollback_bypasses_protection() {
    let registry = Arc::new(ResourceRegistry::new());
    let mut client = ProtectedClient::builder(live_client())
        .engine(Arc::clone(&registry))
        .resolver(Arc::new(ConfigurationResolver::new()))
        .build();

    client.call(&CallRecord::execute("BEGIN")).expect("begin");

    let identity = client.identity().clone();
    let settings = ProtectionSettings::default();
    for _ in 0..settings.failure_threshold {
        registry
            .acquire(identity.as_str(), &settings)
            .expect("closed circuit admits")
            .on_failure(&io::Error::from(io::ErrorKind::ConnectionReset));
    }
    assert!(client.call(&CallRecord::query("SELECT 1")).err().expect("rejected").is_rejection());

    client.call(&CallRecord::execute("ROLLBACK")).expect("rollback bypasses");
}

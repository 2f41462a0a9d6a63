//! Session identity, keep-alive and scope release.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{TestServer, init_tracing};
use pretty_assertions::assert_eq;
use serde_json::json;
use switchboard_client::transport::TransportType;
use switchboard_client::{Client, Error};

#[tokio::test]
async fn test_keep_alive_reuses_session_across_scopes() {
    init_tracing();
    let server = TestServer::new("weather");
    let client = Client::new(server.entry()).unwrap();

    let scope = client.enter().await.unwrap();
    let first = client.session().unwrap();
    scope.exit().await;

    assert!(client.is_connected());
    let scope = client.enter().await.unwrap();
    let second = client.session().unwrap();
    scope.exit().await;

    assert_eq!(first, second);
    assert_eq!(first.id(), second.id());
    assert_eq!(first.transport_type(), TransportType::InProcess);
    assert_eq!(server.initializations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_forces_a_new_session() {
    let server = TestServer::new("weather");
    let client = Client::new(server.entry()).unwrap();

    let scope = client.enter().await.unwrap();
    let before = client.session().unwrap();
    scope.exit().await;

    client.close().await;
    assert!(!client.is_connected());
    assert!(!before.is_connected());
    assert!(client.session().unwrap_err().is_connection());

    let scope = client.enter().await.unwrap();
    let after = client.session().unwrap();
    scope.exit().await;

    assert_ne!(before, after);
    assert_ne!(before.id(), after.id());
    assert_eq!(server.initializations.load(Ordering::SeqCst), 2);

    // Closing twice is harmless.
    client.close().await;
    client.close().await;
}

#[tokio::test]
async fn test_without_keep_alive_outermost_exit_closes() {
    let server = TestServer::new("weather");
    let client = Client::builder()
        .target(server.entry())
        .with_keep_alive(false)
        .build()
        .unwrap();

    let outer = client.enter().await.unwrap();
    let inner = client.enter().await.unwrap();
    let session = client.session().unwrap();

    inner.exit().await;
    assert!(session.is_connected(), "inner exit must not release");

    outer.exit().await;
    assert!(!session.is_connected());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_dropped_scope_still_releases() {
    let server = TestServer::new("weather");
    let client = Client::builder()
        .target(server.entry())
        .with_keep_alive(false)
        .build()
        .unwrap();

    let session = {
        let _scope = client.enter().await.unwrap();
        client.session().unwrap()
    };

    tokio::time::timeout(Duration::from_secs(1), async {
        while session.is_connected() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("teardown task should close the session");
}

#[tokio::test]
async fn test_scoped_exits_on_error() {
    let server = TestServer::new("weather");
    let client = Client::builder()
        .target(server.entry())
        .with_keep_alive(false)
        .build()
        .unwrap();

    let err = client
        .scoped(|client| async move {
            client
                .call_tool("divide", Some(json!({"a": 1, "b": 0})))
                .await
        })
        .await
        .unwrap_err();
    assert!(err.is_tool_error());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_calls_outside_a_scope_fail_fast() {
    let server = TestServer::new("weather");
    let client = Client::new(server.entry()).unwrap();

    let err = client
        .call_tool("get_forecast", Some(json!({"city": "Oslo"})))
        .await
        .unwrap_err();
    assert!(err.is_connection());
    assert!(client.list_tools().await.unwrap_err().is_connection());
    assert_eq!(server.tool_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_handshake_is_a_connection_error() {
    let broken = TestServer::broken("flaky");
    let client = Client::new(broken.entry()).unwrap();

    let err = client.enter().await.unwrap_err();
    assert!(err.is_connection(), "unexpected error: {err:?}");
    assert!(!client.is_connected());
    assert!(client.namespace().is_none());
}

#[tokio::test]
async fn test_failed_entry_releases_healthy_sessions() {
    let healthy = TestServer::new("weather");
    let broken = TestServer::broken("flaky");
    let client = Client::new(vec![healthy.entry(), broken.entry()]).unwrap();

    assert!(client.enter().await.is_err());
    assert!(matches!(
        client.session_for("weather"),
        Err(Error::Connection(_))
    ));
}

#[tokio::test]
async fn test_introspection() {
    let weather = TestServer::new("weather");
    let assistant = TestServer::new("assistant");
    let client = Client::new(vec![weather.entry(), assistant.entry()]).unwrap();

    assert_eq!(
        client.server_names().collect::<Vec<_>>(),
        vec!["weather", "assistant"]
    );
    assert!(matches!(client.session(), Err(Error::Configuration(_))));

    let scope = client.enter().await.unwrap();
    let info = client.server_info("weather").unwrap();
    assert_eq!(info.server_info.name, "weather");
    assert!(info.capabilities.tools.is_some());

    let weather_session = client.session_for("weather").unwrap();
    let assistant_session = client.session_for("assistant").unwrap();
    assert_ne!(weather_session, assistant_session);
    assert_eq!(weather_session.server(), "weather");
    assert!(matches!(
        client.session_for("nope"),
        Err(Error::NotFound { kind: "server", .. })
    ));

    client.ping().await.unwrap();
    scope.exit().await;
}

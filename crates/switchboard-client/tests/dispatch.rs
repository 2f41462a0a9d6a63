//! Argument coercion, deadlines, tool errors and correlation.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{RecordingProgress, TestServer};
use pretty_assertions::assert_eq;
use serde_json::json;
use switchboard_client::{CallOptions, Client, Error};

const T: Duration = Duration::from_millis(200);

#[tokio::test]
async fn test_timeout_boundary() {
    let server = TestServer::new("clock");
    let client = Client::new(server.entry()).unwrap();
    let scope = client.enter().await.unwrap();

    let err = client
        .call_tool_with(
            "sleep",
            Some(json!({"ms": 400})),
            CallOptions::new().timeout(T),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::Timeout {
            method: "tools/call".to_string(),
            timeout: T,
        }
    );

    let outcome = client
        .call_tool_with(
            "sleep",
            Some(json!({"ms": 50})),
            CallOptions::new().timeout(T),
        )
        .await
        .unwrap();
    assert_eq!(outcome.text(), "clock: slept 50ms");

    // The abandoned call was cancelled best-effort and the session lives on.
    assert_eq!(server.cancellations.lock().len(), 1);
    assert_eq!(
        server.cancellations.lock()[0]["reason"],
        json!("request timed out")
    );
    assert!(client.is_connected());
    scope.exit().await;
}

#[tokio::test]
async fn test_client_default_timeout_applies() {
    let server = TestServer::new("clock");
    let client = Client::builder()
        .target(server.entry())
        .with_timeout(T)
        .build()
        .unwrap();
    let scope = client.enter().await.unwrap();

    let err = client
        .call_tool("sleep", Some(json!({"ms": 400})))
        .await
        .unwrap_err();
    assert!(err.is_timeout());

    // A per-call deadline wins over the default.
    client
        .call_tool_with(
            "sleep",
            Some(json!({"ms": 300})),
            CallOptions::new().timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap();
    scope.exit().await;
}

#[tokio::test]
async fn test_uuid_and_literal_coercion() {
    let server = TestServer::new("users");
    let client = Client::new(server.entry()).unwrap();
    let scope = client.enter().await.unwrap();

    let id = "123e4567-e89b-12d3-a456-426614174000";
    let outcome = client
        .call_tool("lookup_user", Some(json!({"user_id": id})))
        .await
        .unwrap();
    assert_eq!(outcome.text(), id);

    let schema = client.namespace().unwrap().tool("lookup_user").unwrap().schema.clone();
    let coerced = schema.coerce(&json!({"user_id": id})).unwrap();
    assert_eq!(
        coerced.get("user_id"),
        Some(&switchboard_client::ArgValue::Uuid(id.parse().unwrap()))
    );

    let calls_before = server.tool_calls.load(Ordering::SeqCst);
    let err = client
        .call_tool("paint", Some(json!({"color": "RED"})))
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "color"));
    assert_eq!(
        server.tool_calls.load(Ordering::SeqCst),
        calls_before,
        "invalid arguments never reach the server"
    );

    let outcome = client
        .call_tool("paint", Some(json!({"color": "red"})))
        .await
        .unwrap();
    assert_eq!(outcome.text(), "red");

    let err = client
        .call_tool("lookup_user", Some(json!({"user_id": "not-a-uuid"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation { ref field, .. } if field == "user_id"));
    scope.exit().await;
}

#[tokio::test]
async fn test_digit_strings_are_coerced_before_sending() {
    let server = TestServer::new("calc");
    let client = Client::new(server.entry()).unwrap();
    let scope = client.enter().await.unwrap();

    let outcome = client
        .call_tool("divide", Some(json!({"a": "9", "b": "3"})))
        .await
        .unwrap();
    assert_eq!(outcome.data, Some(json!(3.0)));
    scope.exit().await;
}

#[tokio::test]
async fn test_division_by_zero_is_delivered_verbatim() {
    for masked in [false, true] {
        let server = TestServer::new("calc");
        let entry = if masked {
            server.masked_entry()
        } else {
            server.entry()
        };
        let client = Client::new(entry).unwrap();
        let scope = client.enter().await.unwrap();

        let err = client
            .call_tool("divide", Some(json!({"a": 1, "b": 0})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            Error::Tool {
                message: "Division by zero".to_string()
            }
        );
        assert_eq!(err.to_string(), "Division by zero");
        scope.exit().await;
    }
}

#[tokio::test]
async fn test_masking_hides_internal_errors_only() {
    let server = TestServer::new("db");
    let client = Client::new(server.masked_entry()).unwrap();
    let scope = client.enter().await.unwrap();

    let err = client.call_tool("explode", None).await.unwrap_err();
    match err {
        Error::Rpc { code, message, .. } => {
            assert_eq!(code, -32603);
            assert!(!message.contains("password"));
        }
        other => panic!("expected an rpc error, got {other:?}"),
    }
    scope.exit().await;
}

#[tokio::test]
async fn test_concurrent_calls_resolve_out_of_order() {
    let server = TestServer::new("clock");
    let client = Client::new(server.entry()).unwrap();
    let scope = client.enter().await.unwrap();

    let slow = client.call_tool("sleep", Some(json!({"ms": 150})));
    let fast = client.call_tool("sleep", Some(json!({"ms": 10})));
    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(slow.unwrap().text(), "clock: slept 150ms");
    assert_eq!(fast.unwrap().text(), "clock: slept 10ms");
    scope.exit().await;
}

#[tokio::test]
async fn test_progress_arrives_in_order() {
    let server = TestServer::new("worker");
    let progress = Arc::new(RecordingProgress::default());
    let client = Client::builder()
        .target(server.entry())
        .with_progress_handler(progress.clone())
        .build()
        .unwrap();
    let scope = client.enter().await.unwrap();

    client.call_tool("report_progress", None).await.unwrap();

    let updates = progress.updates.lock().clone();
    assert_eq!(updates.len(), 2);
    assert_eq!((updates[0].progress, updates[0].total), (50.0, Some(100.0)));
    assert_eq!((updates[1].progress, updates[1].total), (100.0, Some(100.0)));
    assert_eq!(Some(updates[1].progress), updates[1].total);
    assert_eq!(updates[0].server, "worker");
    scope.exit().await;
}

#[tokio::test]
async fn test_per_call_progress_handler_takes_precedence() {
    let server = TestServer::new("worker");
    let registered = Arc::new(RecordingProgress::default());
    let per_call = Arc::new(RecordingProgress::default());
    let client = Client::builder()
        .target(server.entry())
        .with_progress_handler(registered.clone())
        .build()
        .unwrap();
    let scope = client.enter().await.unwrap();

    client
        .call_tool_with(
            "report_progress",
            None,
            CallOptions::new().progress_handler(per_call.clone()),
        )
        .await
        .unwrap();

    assert_eq!(per_call.updates.lock().len(), 2);
    assert!(registered.updates.lock().is_empty());
    scope.exit().await;
}

#[tokio::test]
async fn test_closing_fails_in_flight_calls() {
    let server = TestServer::new("clock");
    let client = Client::new(server.entry()).unwrap();
    let scope = client.enter().await.unwrap();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.call_tool("sleep", Some(json!({"ms": 5000}))).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_connection(), "unexpected error: {err:?}");
    drop(scope);
}

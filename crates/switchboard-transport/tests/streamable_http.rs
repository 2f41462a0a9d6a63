//! Streamable HTTP transport against a mock MCP endpoint.

#![cfg(feature = "http")]

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use switchboard_protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, RequestId, codec};
use switchboard_transport::{
    InboundStream, StreamableHttpConfig, Transport, TransportError, TransportEvent, TransportSpec,
    TransportState,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers requests with a JSON body echoing the id; notifications get 202.
struct EchoResponder {
    sse: bool,
}

impl Respond for EchoResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let Some(id) = body.get("id").cloned() else {
            return ResponseTemplate::new(202);
        };
        let reply = json!({"jsonrpc": "2.0", "id": id, "result": {"method": body["method"]}});
        let template = ResponseTemplate::new(200).insert_header("Mcp-Session-Id", "session-1");
        if self.sse {
            let progress = json!({
                "jsonrpc": "2.0",
                "method": "notifications/progress",
                "params": {"progressToken": id, "progress": 1, "total": 2}
            });
            let stream = format!("event: message\ndata: {progress}\n\nevent: message\ndata: {reply}\n\n");
            template.set_body_raw(stream, "text/event-stream")
        } else {
            template.set_body_json(reply)
        }
    }
}

async fn mount(server: &MockServer, sse: bool) {
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(EchoResponder { sse })
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(405))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn next_message(inbound: &mut InboundStream) -> JsonRpcMessage {
    match inbound.recv().await {
        Some(TransportEvent::Frame(frame)) => codec::decode(&frame).unwrap(),
        Some(TransportEvent::Message(message)) => message,
        other => panic!("unexpected inbound event {other:?}"),
    }
}

fn transport_for(server: &MockServer, config: impl FnOnce(StreamableHttpConfig) -> StreamableHttpConfig) -> Transport {
    let spec = TransportSpec::StreamableHttp(config(StreamableHttpConfig::new(format!(
        "{}/mcp",
        server.uri()
    ))));
    Transport::from_spec(&spec).unwrap()
}

#[tokio::test]
async fn test_json_response_is_delivered_inbound() {
    let server = MockServer::start().await;
    mount(&server, false).await;
    let transport = transport_for(&server, |c| c);
    let mut inbound = transport.open().await.unwrap();

    transport
        .send(JsonRpcRequest::new("ping", None, RequestId::Number(1)).into())
        .await
        .unwrap();

    match next_message(&mut inbound).await {
        JsonRpcMessage::Response(response) => {
            assert_eq!(response.id, Some(RequestId::Number(1)));
            assert_eq!(response.result(), Some(&json!({"method": "ping"})));
        }
        other => panic!("expected response, got {other:?}"),
    }
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_sse_response_delivers_notifications_then_result() {
    let server = MockServer::start().await;
    mount(&server, true).await;
    let transport = transport_for(&server, |c| c);
    let mut inbound = transport.open().await.unwrap();

    transport
        .send(JsonRpcRequest::new("tools/call", Some(json!({"name": "slow"})), RequestId::Number(5)).into())
        .await
        .unwrap();

    let first = next_message(&mut inbound).await;
    assert_eq!(first.method(), Some("notifications/progress"));
    let second = next_message(&mut inbound).await;
    assert!(matches!(second, JsonRpcMessage::Response(r) if r.id == Some(RequestId::Number(5))));
    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_notifications_are_accepted_without_body() {
    let server = MockServer::start().await;
    mount(&server, false).await;
    let transport = transport_for(&server, |c| c);
    let mut inbound = transport.open().await.unwrap();

    transport
        .send(JsonRpcNotification::new("notifications/initialized", None).into())
        .await
        .unwrap();
    transport.close().await.unwrap();
    assert!(inbound.recv().await.is_none());
}

#[tokio::test]
async fn test_bearer_token_and_custom_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer your-token-here"))
        .and(header("x-tenant", "acme"))
        .respond_with(EchoResponder { sse: false })
        .expect(1)
        .mount(&server)
        .await;
    let transport = transport_for(&server, |c| {
        c.bearer_token("your-token-here").header("X-Tenant", "acme")
    });
    let mut inbound = transport.open().await.unwrap();
    transport
        .send(JsonRpcRequest::new("ping", None, RequestId::Number(2)).into())
        .await
        .unwrap();
    assert!(matches!(next_message(&mut inbound).await, JsonRpcMessage::Response(_)));
}

#[tokio::test]
async fn test_server_error_status_fails_send() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let transport = transport_for(&server, |c| c);
    let _inbound = transport.open().await.unwrap();
    let err = transport
        .send(JsonRpcRequest::new("ping", None, RequestId::Number(3)).into())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::SendFailed(_)));
}

#[tokio::test]
async fn test_unreachable_server_is_connection_failure() {
    let transport = Transport::from_spec(&TransportSpec::StreamableHttp(StreamableHttpConfig::new(
        "http://127.0.0.1:9/mcp",
    )))
    .unwrap();
    let mut inbound = transport.open().await.unwrap();
    let err = transport
        .send(JsonRpcRequest::new("ping", None, RequestId::Number(4)).into())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ConnectionFailed(_)));

    // The failure is final and the reader hears about it.
    assert!(matches!(transport.state(), TransportState::Failed { .. }));
    match inbound.recv().await {
        Some(TransportEvent::Failed(e)) => assert!(e.is_fatal()),
        other => panic!("expected a failure event, got {other:?}"),
    }
    assert!(inbound.recv().await.is_none());
    let err = transport
        .send(JsonRpcRequest::new("ping", None, RequestId::Number(5)).into())
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::NotConnected);
}

#[tokio::test]
async fn test_expired_http_session_fails_the_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(EchoResponder { sse: false })
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let transport = transport_for(&server, |c| c);
    let mut inbound = transport.open().await.unwrap();

    transport
        .send(JsonRpcRequest::new("ping", None, RequestId::Number(1)).into())
        .await
        .unwrap();
    assert!(matches!(next_message(&mut inbound).await, JsonRpcMessage::Response(_)));

    let err = transport
        .send(JsonRpcRequest::new("ping", None, RequestId::Number(2)).into())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::ConnectionLost(_)));
    assert!(matches!(inbound.recv().await, Some(TransportEvent::Failed(_))));
}

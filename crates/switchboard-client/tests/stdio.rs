//! Process-backed servers: a minimal `sh` server, and servers that fail to
//! come up or die mid-session.

#![cfg(all(unix, feature = "stdio"))]

use std::time::Duration;

use serde_json::json;
use switchboard_client::transport::{StdioConfig, TransportType};
use switchboard_client::{Client, Error, McpConfig};

/// Line-oriented MCP server in plain `sh`. `hang` never answers; `crash`
/// exits while its call is in flight.
const SH_SERVER: &str = r#"
reply() { printf '{"jsonrpc":"2.0","id":%s,"result":%s}\n' "$1" "$2"; }
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      reply "$id" '{"protocolVersion":"2025-06-18","capabilities":{"tools":{}},"serverInfo":{"name":"sh-server","version":"0.1.0"}}' ;;
    *'"method":"tools/list"'*)
      reply "$id" '{"tools":[{"name":"greet","inputSchema":{"type":"object","properties":{"times":{"type":"integer"}}}},{"name":"hang","inputSchema":{"type":"object"}},{"name":"crash","inputSchema":{"type":"object"}}]}' ;;
    *'"name":"greet"'*)
      reply "$id" '{"content":[{"type":"text","text":"hello from sh"}]}' ;;
    *'"name":"hang"'*) ;;
    *'"name":"crash"'*) sleep 0.2; exit 3 ;;
    *'"method":"ping"'*) reply "$id" '{}' ;;
  esac
done
"#;

fn sh_server() -> StdioConfig {
    StdioConfig::new("sh").args(["-c", SH_SERVER])
}

#[tokio::test]
async fn test_stdio_server_round_trip() {
    let client = Client::builder()
        .target(sh_server())
        .with_timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let scope = client.enter().await.unwrap();

    let session = client.session().unwrap();
    assert_eq!(session.transport_type(), TransportType::Stdio);
    assert!(session.process_id().await.is_some());
    assert_eq!(
        client.server_info("default").unwrap().server_info.name,
        "sh-server"
    );

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 3);
    let outcome = client
        .call_tool("greet", Some(json!({"times": "2"})))
        .await
        .unwrap();
    assert_eq!(outcome.text(), "hello from sh");
    client.ping().await.unwrap();

    scope.exit().await;
}

#[tokio::test]
async fn test_server_exit_fails_every_pending_call() {
    let client = Client::new(sh_server()).unwrap();
    let scope = client.enter().await.unwrap();

    let hanging = {
        let client = client.clone();
        tokio::spawn(async move { client.call_tool("hang", None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = client.call_tool("crash", None).await.unwrap_err();
    assert!(err.is_connection(), "unexpected error: {err:?}");
    let err = tokio::time::timeout(Duration::from_secs(5), hanging)
        .await
        .expect("pending call was not failed")
        .unwrap()
        .unwrap_err();
    assert!(err.is_connection(), "unexpected error: {err:?}");
    assert!(!client.is_connected());

    // Calls after the loss fail fast.
    let err = client.call_tool("greet", None).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));

    scope.exit().await;

    // The next scope starts a fresh process.
    let scope = client.enter().await.unwrap();
    let outcome = client.call_tool("greet", None).await.unwrap();
    assert_eq!(outcome.text(), "hello from sh");
    scope.exit().await;
}

#[tokio::test]
async fn test_process_exiting_during_handshake_is_a_connection_error() {
    let client = Client::builder()
        .target(StdioConfig::new("true"))
        .with_init_timeout(Duration::from_secs(5))
        .build()
        .unwrap();

    let err = client.enter().await.unwrap_err();
    assert!(err.is_connection(), "unexpected error: {err:?}");
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_missing_binary_is_a_connection_error() {
    let config: McpConfig = r#"{
        "mcpServers": {
            "ghost": {"command": "switchboard-definitely-not-installed", "args": ["--stdio"]}
        }
    }"#
    .parse()
    .unwrap();
    let client = Client::new(config).unwrap();

    let err = client.enter().await.unwrap_err();
    assert!(err.is_connection(), "unexpected error: {err:?}");
    assert!(err.to_string().contains("ghost"));
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rmcp::ClientHandler;
use rmcp::service::{NotificationContext, Peer, RoleClient, ServiceError, ServiceExt};
use rmcp::transport::IntoTransport;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::ClientError;
use crate::model::{CallToolResult, ErrorBody, InitializeResult, McpTool, convert};

/// How long a failed request waits for the session to report the close.
const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Notification pushed by a provider outside any request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
  ToolListChanged,
}

/// Initialized session with one external provider.
///
/// Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct McpClient {
  inner: Arc<Inner>,
}

struct Inner {
  name: String,
  peer: Peer<RoleClient>,
  server: Option<InitializeResult>,
  closed: watch::Receiver<bool>,
  notifications: broadcast::Sender<Notification>,
  shutdown: CancellationToken,
}

/// Receives provider-initiated messages for one session.
struct ProviderHandler {
  name: String,
  notifications: broadcast::Sender<Notification>,
}

impl ClientHandler for ProviderHandler {
  async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
    trace!(server = %self.name, "provider tool list changed");
    let _ = self.notifications.send(Notification::ToolListChanged);
  }
}

impl McpClient {
  /// Run the MCP handshake over `transport` and keep the session open.
  pub async fn serve<T, E, A>(name: impl Into<String>, transport: T) -> Result<Self, ClientError>
  where
    T: IntoTransport<RoleClient, E, A>,
    E: std::error::Error + Send + Sync + 'static,
  {
    let name = name.into();
    let (notifications, _) = broadcast::channel(32);
    let shutdown = CancellationToken::new();
    let handler = ProviderHandler {
      name: name.clone(),
      notifications: notifications.clone(),
    };

    let service = handler
      .serve_with_ct(transport, shutdown.clone())
      .await
      .map_err(|err| ClientError::Handshake(err.to_string()))?;

    let server = match convert::<_, Option<InitializeResult>>(&service.peer_info()) {
      Ok(server) => server,
      Err(err) => {
        debug!(server = %name, "unreadable provider info: {err}");
        None
      }
    };
    debug!(
      server = %name,
      protocol = server.as_ref().map_or("unknown", |info| info.protocol_version.as_str()),
      "provider initialized"
    );

    let peer = service.peer().clone();
    let (closed_tx, closed) = watch::channel(false);
    let session = name.clone();
    tokio::spawn(async move {
      match service.waiting().await {
        Ok(reason) => debug!(server = %session, ?reason, "provider session ended"),
        Err(err) => warn!(server = %session, "provider session task failed: {err}"),
      }
      closed_tx.send_replace(true);
    });

    Ok(Self {
      inner: Arc::new(Inner {
        name,
        peer,
        server,
        closed,
        notifications,
        shutdown,
      }),
    })
  }

  /// Session over an already-open byte stream.
  pub async fn from_stream<R, W>(
    name: impl Into<String>,
    reader: R,
    writer: W,
  ) -> Result<Self, ClientError>
  where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
  {
    Self::serve(name, (reader, writer)).await
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// Handshake result, when the provider's answer could be read.
  pub fn server_info(&self) -> Option<&InitializeResult> {
    self.inner.server.as_ref()
  }

  pub fn is_closed(&self) -> bool {
    *self.inner.closed.borrow()
  }

  /// Resolves once the session has ended.
  pub async fn closed(&self) {
    let mut closed = self.inner.closed.clone();
    // An error means the sender is gone, which also means closed.
    let _ = closed.wait_for(|closed| *closed).await;
  }

  pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
    self.inner.notifications.subscribe()
  }

  /// Fetch every advertised tool, following pagination cursors.
  pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<McpTool>, ClientError> {
    let tools = self
      .run(Some(timeout), self.inner.peer.list_all_tools())
      .await?;
    tools.iter().map(convert).collect()
  }

  pub async fn call_tool(
    &self,
    name: &str,
    arguments: Value,
    timeout: Option<Duration>,
  ) -> Result<CallToolResult, ClientError> {
    let mut params = json!({ "name": name });
    match arguments {
      Value::Null => {}
      Value::Object(_) => params["arguments"] = arguments,
      other => {
        return Err(ClientError::Protocol(format!(
          "tool arguments must be an object, got {other}"
        )));
      }
    }
    let request = serde_json::from_value(params)?;
    let result = self
      .run(timeout, self.inner.peer.call_tool(request))
      .await?;
    convert(&result)
  }

  /// End the session; a child-process provider is killed with it.
  pub fn shutdown(&self) {
    self.inner.shutdown.cancel();
  }

  /// Await `request` under `timeout`, failing fast if the session ends.
  async fn run<T>(
    &self,
    timeout: Option<Duration>,
    request: impl Future<Output = Result<T, ServiceError>>,
  ) -> Result<T, ClientError> {
    if self.is_closed() {
      return Err(ClientError::Disconnected);
    }
    let bounded = async {
      match timeout {
        Some(limit) => tokio::time::timeout(limit, request)
          .await
          .map_err(|_| ClientError::Timeout(limit)),
        None => Ok(request.await),
      }
    };
    let result = tokio::select! {
      _ = self.closed() => return Err(ClientError::Disconnected),
      result = bounded => result?,
    };
    match result {
      Ok(value) => Ok(value),
      Err(err) => Err(self.service_error(err).await),
    }
  }

  async fn service_error(&self, err: ServiceError) -> ClientError {
    if let ServiceError::McpError(error) = &err {
      return match convert::<_, ErrorBody>(error) {
        Ok(body) => ClientError::Rpc {
          code: body.code,
          message: body.message,
          data: body.data,
        },
        Err(_) => ClientError::Protocol(err.to_string()),
      };
    }
    // A dropped transport fails the request just before the session ends.
    if tokio::time::timeout(CLOSE_GRACE, self.closed()).await.is_ok() {
      return ClientError::Disconnected;
    }
    ClientError::Protocol(err.to_string())
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::json;
  use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf,
  };

  use super::*;

  /// Provider end of an in-memory session.
  struct Wire {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
  }

  impl Wire {
    async fn recv(&mut self) -> Value {
      let mut line = String::new();
      self.reader.read_line(&mut line).await.expect("read line");
      serde_json::from_str(&line).expect("message json")
    }

    async fn send(&mut self, message: Value) {
      let mut line = message.to_string();
      line.push('\n');
      self.writer.write_all(line.as_bytes()).await.expect("write line");
    }

    async fn reply(&mut self, request: &Value, result: Value) {
      self
        .send(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result }))
        .await;
    }
  }

  /// Client that finished its handshake, plus the provider end.
  async fn connected() -> (McpClient, Wire) {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_end);
    let (server_read, server_write) = tokio::io::split(server_end);
    let mut wire = Wire {
      reader: BufReader::new(server_read),
      writer: server_write,
    };

    let client = tokio::spawn(McpClient::from_stream("fake", client_read, client_write));
    let init = wire.recv().await;
    assert_eq!(init["method"], json!("initialize"));
    wire
      .reply(
        &init,
        json!({
          "protocolVersion": "2025-03-26",
          "capabilities": { "tools": { "listChanged": true } },
          "serverInfo": { "name": "fake", "version": "0.0.0" }
        }),
      )
      .await;
    let initialized = wire.recv().await;
    assert_eq!(initialized["method"], json!("notifications/initialized"));

    let client = client.await.expect("join").expect("handshake");
    (client, wire)
  }

  fn text(text: &str) -> Value {
    json!({ "content": [{ "type": "text", "text": text }] })
  }

  #[tokio::test]
  async fn handshake_and_paginated_listing() {
    let (client, mut wire) = connected().await;
    assert_eq!(
      client
        .server_info()
        .and_then(|info| info.server_info.as_ref())
        .map(|server| server.name.as_str()),
      Some("fake")
    );

    let listing = tokio::spawn({
      let client = client.clone();
      async move { client.list_tools(Duration::from_secs(5)).await }
    });
    let page_one = wire.recv().await;
    assert_eq!(page_one["method"], json!("tools/list"));
    wire
      .reply(
        &page_one,
        json!({
          "tools": [{ "name": "search", "inputSchema": { "type": "object" } }],
          "nextCursor": "p2"
        }),
      )
      .await;
    let page_two = wire.recv().await;
    assert_eq!(page_two["params"]["cursor"], json!("p2"));
    wire
      .reply(
        &page_two,
        json!({
          "tools": [{
            "name": "fetch",
            "inputSchema": { "type": "object" },
            "annotations": { "readOnlyHint": true }
          }]
        }),
      )
      .await;

    let tools = listing.await.expect("join").expect("list tools");
    let names: Vec<&str> = tools.iter().map(|tool| tool.name.as_str()).collect();
    assert_eq!(names, vec!["search", "fetch"]);
    assert_eq!(
      tools[1]
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.read_only_hint),
      Some(true)
    );
  }

  #[tokio::test]
  async fn out_of_order_responses_are_matched_by_id() {
    let (client, mut wire) = connected().await;

    let first = tokio::spawn({
      let client = client.clone();
      async move { client.call_tool("slow", json!({}), None).await }
    });
    let first_request = wire.recv().await;
    let second = tokio::spawn({
      let client = client.clone();
      async move { client.call_tool("fast", json!({}), None).await }
    });
    let second_request = wire.recv().await;
    assert_eq!(second_request["params"]["name"], json!("fast"));

    wire.reply(&second_request, text("fast done")).await;
    wire.reply(&first_request, text("slow done")).await;

    let second = second.await.expect("join").expect("fast result");
    let first = first.await.expect("join").expect("slow result");
    assert_eq!(first.text(), "slow done");
    assert_eq!(second.text(), "fast done");
  }

  #[tokio::test]
  async fn disconnect_fails_in_flight_requests() {
    let (client, mut wire) = connected().await;

    let pending = tokio::spawn({
      let client = client.clone();
      async move { client.call_tool("hang", json!({}), None).await }
    });
    wire.recv().await;
    drop(wire);

    let result = pending.await.expect("join");
    assert!(matches!(result, Err(ClientError::Disconnected)));
    client.closed().await;
    assert!(client.is_closed());

    let after = client.call_tool("again", json!({}), None).await;
    assert!(matches!(after, Err(ClientError::Disconnected)));
  }

  #[tokio::test]
  async fn provider_errors_are_relayed() {
    let (client, mut wire) = connected().await;

    let pending = tokio::spawn({
      let client = client.clone();
      async move { client.call_tool("missing", json!({}), None).await }
    });
    let request = wire.recv().await;
    wire
      .send(json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "error": { "code": -32602, "message": "unknown tool" }
      }))
      .await;

    match pending.await.expect("join") {
      Err(ClientError::Rpc { code, message, .. }) => {
        assert_eq!(code, -32602);
        assert_eq!(message, "unknown tool");
      }
      other => panic!("expected rpc error, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn tool_errors_are_results_not_failures() {
    let (client, mut wire) = connected().await;

    let pending = tokio::spawn({
      let client = client.clone();
      async move { client.call_tool("flaky", json!({ "n": 1 }), None).await }
    });
    let request = wire.recv().await;
    assert_eq!(request["params"]["arguments"], json!({ "n": 1 }));
    wire
      .reply(
        &request,
        json!({ "content": [{ "type": "text", "text": "boom" }], "isError": true }),
      )
      .await;

    let result = pending.await.expect("join").expect("call result");
    assert!(result.is_error());
    assert_eq!(result.text(), "boom");
  }

  #[tokio::test]
  async fn list_changed_is_forwarded() {
    let (client, mut wire) = connected().await;
    let mut notifications = client.subscribe_notifications();

    wire
      .send(json!({ "jsonrpc": "2.0", "method": "notifications/tools/list_changed" }))
      .await;

    let notification = tokio::time::timeout(Duration::from_secs(5), notifications.recv())
      .await
      .expect("notification in time")
      .expect("notification");
    assert_eq!(notification, Notification::ToolListChanged);
  }

  #[tokio::test]
  async fn unanswered_requests_time_out() {
    let (client, mut wire) = connected().await;

    let pending = tokio::spawn({
      let client = client.clone();
      async move {
        client
          .call_tool("hang", json!({}), Some(Duration::from_millis(50)))
          .await
      }
    });
    wire.recv().await;

    let result = pending.await.expect("join");
    assert!(matches!(result, Err(ClientError::Timeout(_))));
    assert!(!client.is_closed());
  }

  #[tokio::test]
  async fn non_object_arguments_are_rejected() {
    let (client, _wire) = connected().await;
    let result = client.call_tool("search", json!("text"), None).await;
    assert!(matches!(result, Err(ClientError::Protocol(_))));
  }
}

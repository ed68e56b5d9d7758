#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use tether_config::{Config, McpServerConfig, McpServerTransportConfig};
use tether_core::Tether;
use tether_core::event::{PresentationSink, SinkError};
use tether_core::model::{ModelClient, ModelError, ModelRequest, ResponseStream};
use tether_mcp_client::McpClient;
use tether_protocol::{
  ApprovalRequestEvent, ApprovalRetractedEvent, ContentDeltaEvent, EventMsg, FunctionCall,
  FunctionCallEvent, ResponseEvent, ReviewDecision, ToolOutcome, ToolResult, TranscriptItem,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// MODEL
// ============================================================================

#[derive(Debug)]
pub enum Step {
  Text(&'static str),
  Call {
    id: &'static str,
    name: &'static str,
    arguments: Value,
  },
  /// Keep the stream open forever.
  Hang,
}

pub fn call(id: &'static str, name: &'static str, arguments: Value) -> Step {
  Step::Call {
    id,
    name,
    arguments,
  }
}

/// Plays back one script per request and records what it was asked.
/// Running out of scripts is reported as a provider failure.
#[derive(Default)]
pub struct ScriptedModel {
  scripts: Mutex<VecDeque<Vec<Step>>>,
  requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
  pub fn new(scripts: Vec<Vec<Step>>) -> Arc<Self> {
    Arc::new(Self {
      scripts: Mutex::new(scripts.into()),
      requests: Mutex::new(Vec::new()),
    })
  }

  pub fn requests(&self) -> Vec<ModelRequest> {
    self.requests.lock().expect("requests lock").clone()
  }
}

#[async_trait]
impl ModelClient for ScriptedModel {
  async fn stream(&self, request: ModelRequest) -> Result<ResponseStream, ModelError> {
    self.requests.lock().expect("requests lock").push(request);
    let Some(script) = self.scripts.lock().expect("scripts lock").pop_front() else {
      return Err(ModelError::ApiError {
        status: 500,
        body: "no scripted response left".to_string(),
      });
    };

    let mut events: Vec<Result<ResponseEvent, ModelError>> = Vec::new();
    let mut hang = false;
    for step in script {
      match step {
        Step::Text(text) => events.push(Ok(ResponseEvent::ContentDelta(ContentDeltaEvent {
          text: text.to_string(),
          index: 0,
        }))),
        Step::Call {
          id,
          name,
          arguments,
        } => events.push(Ok(ResponseEvent::FunctionCall(FunctionCallEvent {
          id: id.to_string(),
          call_type: "function".to_string(),
          function: FunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
          },
        }))),
        Step::Hang => hang = true,
      }
    }

    if !hang {
      events.push(Ok(ResponseEvent::EndTurn));
    }
    let head = futures::stream::iter(events);
    if hang {
      Ok(Box::pin(head.chain(futures::stream::pending())))
    } else {
      Ok(Box::pin(head))
    }
  }
}

// ============================================================================
// SINK
// ============================================================================

/// Records every event and answers prompts from a per-tool table. Tools
/// without an answer leave the prompt open until it is retracted.
#[derive(Default)]
pub struct RecordingSink {
  events: Mutex<Vec<EventMsg>>,
  prompts: Mutex<Vec<ApprovalRequestEvent>>,
  answers: Mutex<HashMap<String, ReviewDecision>>,
}

impl RecordingSink {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn answer(&self, tool: &str, decision: ReviewDecision) {
    self
      .answers
      .lock()
      .expect("answers lock")
      .insert(tool.to_string(), decision);
  }

  pub fn events(&self) -> Vec<EventMsg> {
    self.events.lock().expect("events lock").clone()
  }

  pub fn prompts(&self) -> Vec<ApprovalRequestEvent> {
    self.prompts.lock().expect("prompts lock").clone()
  }

  pub fn states(&self) -> Vec<String> {
    self
      .events()
      .into_iter()
      .filter_map(|event| match event {
        EventMsg::StateChanged(changed) => Some(changed.state),
        _ => None,
      })
      .collect()
  }

  pub fn retracted(&self) -> Vec<String> {
    self
      .events()
      .into_iter()
      .filter_map(|event| match event {
        EventMsg::ApprovalRetracted(retracted) => Some(retracted.call_id),
        _ => None,
      })
      .collect()
  }
}

#[async_trait]
impl PresentationSink for RecordingSink {
  async fn emit(&self, event: EventMsg) {
    self.events.lock().expect("events lock").push(event);
  }

  async fn prompt_approval(&self, request: ApprovalRequestEvent) -> Result<ReviewDecision, SinkError> {
    let answer = self
      .answers
      .lock()
      .expect("answers lock")
      .get(&request.tool_name)
      .copied();
    self.prompts.lock().expect("prompts lock").push(request);
    match answer {
      Some(decision) => Ok(decision),
      None => futures::future::pending().await,
    }
  }

  async fn retract_approval(&self, call_id: &str) {
    self
      .emit(EventMsg::ApprovalRetracted(ApprovalRetractedEvent {
        call_id: call_id.to_string(),
      }))
      .await;
  }
}

// ============================================================================
// SESSION HELPERS
// ============================================================================

pub fn config_in(dir: &Path) -> Config {
  let mut config = Config::default();
  config.tools.cwd = Some(dir.to_path_buf());
  config
}

pub async fn start(config: Config, model: Arc<ScriptedModel>, sink: Arc<RecordingSink>) -> Tether {
  Tether::new(config, model, sink).await.expect("session starts")
}

pub fn tool_results(transcript: &[TranscriptItem]) -> Vec<ToolResult> {
  transcript
    .iter()
    .filter_map(|item| match item {
      TranscriptItem::ToolResult(result) => Some(result.clone()),
      _ => None,
    })
    .collect()
}

pub fn content(result: &ToolResult) -> &str {
  match &result.outcome {
    ToolOutcome::Success(output) => &output.content,
    ToolOutcome::Failure(failure) => panic!("expected success, got {failure:?}"),
  }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
  for _ in 0..100 {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  check()
}

// ============================================================================
// TOOL PROVIDER
// ============================================================================

pub fn remote_tool(name: &str) -> Value {
  json!({
    "name": name,
    "description": format!("fake {name}"),
    "inputSchema": {
      "type": "object",
      "properties": { "key": { "type": "string" } }
    }
  })
}

pub fn provider_config() -> McpServerConfig {
  McpServerConfig::new(McpServerTransportConfig::Tcp {
    address: "127.0.0.1:9".to_string(),
  })
}

/// In-memory provider. `hang` never answers, `fail` reports a tool error,
/// anything else echoes its name and arguments.
pub struct FakeProvider {
  tools: Arc<Mutex<Vec<Value>>>,
  calls: mpsc::UnboundedReceiver<String>,
  outbound: mpsc::UnboundedSender<Value>,
  kill: CancellationToken,
  close_after_listing: Arc<AtomicBool>,
}

impl FakeProvider {
  /// Start the provider and hand back a client that finished its handshake.
  pub async fn start(tools: Vec<Value>) -> (Self, McpClient) {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client_end);

    let tools = Arc::new(Mutex::new(tools));
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    let kill = CancellationToken::new();
    let close_after_listing = Arc::new(AtomicBool::new(false));
    tokio::spawn(serve(
      server_end,
      tools.clone(),
      calls_tx,
      outbound_rx,
      kill.clone(),
      close_after_listing.clone(),
    ));

    let client = McpClient::from_stream("fake", client_read, client_write)
      .await
      .expect("provider handshake");
    (
      Self {
        tools,
        calls,
        outbound,
        kill,
        close_after_listing,
      },
      client,
    )
  }

  /// Hang up right after answering the next `tools/list`.
  pub fn close_after_listing(&self) {
    self.close_after_listing.store(true, Ordering::SeqCst);
  }

  /// Name of the next tool the provider was asked to run.
  pub async fn next_call(&mut self) -> String {
    tokio::time::timeout(Duration::from_secs(5), self.calls.recv())
      .await
      .expect("provider received a call")
      .expect("provider still running")
  }

  pub fn set_tools(&self, tools: Vec<Value>) {
    *self.tools.lock().expect("tools lock") = tools;
  }

  pub fn announce_list_changed(&self) {
    let _ = self.outbound.send(json!({
      "jsonrpc": "2.0",
      "method": "notifications/tools/list_changed"
    }));
  }

  /// Drop the transport as if the provider process died.
  pub fn kill(&self) {
    self.kill.cancel();
  }
}

async fn serve(
  stream: DuplexStream,
  tools: Arc<Mutex<Vec<Value>>>,
  calls: mpsc::UnboundedSender<String>,
  mut outbound: mpsc::UnboundedReceiver<Value>,
  kill: CancellationToken,
  close_after_listing: Arc<AtomicBool>,
) {
  let (read, mut write) = tokio::io::split(stream);
  let mut lines = BufReader::new(read).lines();
  loop {
    tokio::select! {
      _ = kill.cancelled() => break,
      Some(message) = outbound.recv() => send(&mut write, message).await,
      line = lines.next_line() => {
        let Ok(Some(line)) = line else { break };
        let request: Value = serde_json::from_str(&line).expect("request json");
        let Some(id) = request.get("id").cloned() else { continue };
        let result = match request["method"].as_str().unwrap_or_default() {
          "initialize" => json!({
            "protocolVersion": "2025-03-26",
            "capabilities": { "tools": { "listChanged": true } },
            "serverInfo": { "name": "fake", "version": "0.0.0" }
          }),
          "tools/list" => {
            let listing = json!({ "tools": tools.lock().expect("tools lock").clone() });
            if close_after_listing.load(Ordering::SeqCst) {
              send(&mut write, json!({ "jsonrpc": "2.0", "id": id, "result": listing })).await;
              break;
            }
            listing
          }
          "tools/call" => {
            let name = request["params"]["name"].as_str().unwrap_or_default().to_string();
            let _ = calls.send(name.clone());
            match name.as_str() {
              "hang" => continue,
              "fail" => json!({
                "content": [{ "type": "text", "text": "provider exploded" }],
                "isError": true
              }),
              _ => json!({
                "content": [{
                  "type": "text",
                  "text": format!("{name}: {}", request["params"]["arguments"])
                }]
              }),
            }
          }
          method => {
            send(&mut write, json!({
              "jsonrpc": "2.0",
              "id": id,
              "error": { "code": -32601, "message": format!("unknown method {method}") }
            }))
            .await;
            continue;
          }
        };
        send(&mut write, json!({ "jsonrpc": "2.0", "id": id, "result": result })).await;
      }
    }
  }
}

async fn send(write: &mut WriteHalf<DuplexStream>, message: Value) {
  let mut line = message.to_string();
  line.push('\n');
  let _ = write.write_all(line.as_bytes()).await;
}

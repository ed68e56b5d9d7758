//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint speaking the `/chat/completions` streaming
//! dialect (OpenAI, OpenRouter, Ollama, LM Studio, vLLM).

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tether_config::ModelsConfig;
use tether_protocol::{
  ContentDeltaEvent, FunctionCall, FunctionCallEvent, ModelResponse, ResponseErrorEvent,
  ResponseEvent, TranscriptItem,
};
use tracing::debug;

use super::error::{ModelError, Result};
use super::{ModelClient, ModelRequest, ResponseStream};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
  client: Client,
  base_url: String,
  api_key: Option<String>,
  model: String,
}

impl OpenAiClient {
  pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
    let client = Client::builder()
      .connect_timeout(Duration::from_secs(30))
      .build()
      .unwrap_or_else(|_| Client::new());
    Self {
      client,
      base_url: base_url.into(),
      api_key,
      model: model.into(),
    }
  }

  /// The key is read from the environment variable named by `api_key_env`;
  /// local endpoints work without one.
  pub fn from_config(config: &ModelsConfig) -> Self {
    let base_url = config
      .base_url
      .clone()
      .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let api_key = std::env::var(&config.api_key_env)
      .ok()
      .filter(|key| !key.is_empty());
    Self::new(base_url, api_key, config.model.clone())
  }

  fn endpoint(&self, path: &str) -> String {
    format!("{}/{}", self.base_url.trim_end_matches('/'), path)
  }

  fn request_body(&self, request: &ModelRequest) -> Value {
    let mut body = json!({
      "model": self.model,
      "messages": build_messages(request),
      "stream": true,
    });
    if !request.tools.is_empty() {
      body["tools"] = Value::Array(
        request
          .tools
          .iter()
          .map(|tool| {
            json!({
              "type": "function",
              "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.parameters,
              }
            })
          })
          .collect(),
      );
    }
    body
  }
}

#[async_trait]
impl ModelClient for OpenAiClient {
  async fn stream(&self, request: ModelRequest) -> Result<ResponseStream> {
    let url = self.endpoint("chat/completions");
    let mut builder = self
      .client
      .post(&url)
      .header("Content-Type", "application/json")
      .json(&self.request_body(&request));
    if let Some(api_key) = &self.api_key {
      builder = builder.bearer_auth(api_key);
    }

    debug!(model = %self.model, items = request.transcript.len(), tools = request.tools.len(), "requesting completion");
    let response = builder.send().await?;
    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::AuthError(body),
        _ => ModelError::ApiError {
          status: status.as_u16(),
          body,
        },
      });
    }

    Ok(Box::pin(async_stream::stream! {
      let mut bytes = response.bytes_stream();
      let mut decoder = SseDecoder::default();
      while let Some(item) = bytes.next().await {
        let chunk = match item {
          Ok(chunk) => chunk,
          Err(err) => {
            yield Err(ModelError::NetworkError(err));
            return;
          }
        };
        match decoder.push(&chunk) {
          Ok(events) => {
            for event in events {
              yield Ok(event);
            }
          }
          Err(err) => {
            yield Err(err);
            return;
          }
        }
        if decoder.done {
          break;
        }
      }
      match decoder.finish() {
        Ok(events) => {
          for event in events {
            yield Ok(event);
          }
        }
        Err(err) => {
          yield Err(err);
        }
      }
    }))
  }
}

/// Chat messages for the transcript, system prompt first.
fn build_messages(request: &ModelRequest) -> Vec<Value> {
  let mut messages = Vec::with_capacity(request.transcript.len() + 1);
  if let Some(prompt) = &request.system_prompt {
    messages.push(json!({ "role": "system", "content": prompt }));
  }
  for item in &request.transcript {
    match item {
      TranscriptItem::User { text } => messages.push(json!({ "role": "user", "content": text })),
      TranscriptItem::Model(turn) => match &turn.response {
        ModelResponse::FinalAnswer { text } => {
          messages.push(json!({ "role": "assistant", "content": text }));
        }
        ModelResponse::ToolCallBatch { preamble, calls } => {
          let tool_calls: Vec<Value> = calls
            .iter()
            .map(|call| {
              // Unparseable arguments were kept verbatim as a JSON string.
              let arguments = match &call.arguments {
                Value::String(raw) => raw.clone(),
                other => other.to_string(),
              };
              json!({
                "id": call.id,
                "type": "function",
                "function": { "name": call.tool_name, "arguments": arguments },
              })
            })
            .collect();
          messages.push(json!({
            "role": "assistant",
            "content": preamble,
            "tool_calls": tool_calls,
          }));
        }
      },
      TranscriptItem::ToolResult(result) => messages.push(json!({
        "role": "tool",
        "tool_call_id": result.call_id,
        "content": result.model_content(),
      })),
    }
  }
  messages
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
  #[serde(default)]
  choices: Vec<ChunkChoice>,
  #[serde(default)]
  error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
  #[serde(default)]
  index: usize,
  #[serde(default)]
  delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
  #[serde(default)]
  content: Option<String>,
  #[serde(default)]
  tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
  #[serde(default)]
  index: usize,
  #[serde(default)]
  id: Option<String>,
  #[serde(default)]
  function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
  #[serde(default)]
  name: Option<String>,
  #[serde(default)]
  arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
  message: String,
}

#[derive(Debug, Default)]
struct PendingCall {
  id: String,
  name: String,
  arguments: String,
}

/// Line-oriented SSE decoder. Text is emitted as it arrives; tool calls are
/// assembled from their fragments and emitted once the stream ends.
#[derive(Debug, Default)]
struct SseDecoder {
  buffer: Vec<u8>,
  calls: BTreeMap<usize, PendingCall>,
  done: bool,
}

impl SseDecoder {
  fn push(&mut self, bytes: &[u8]) -> Result<Vec<ResponseEvent>> {
    self.buffer.extend_from_slice(bytes);
    let mut events = Vec::new();
    while let Some(pos) = self.buffer.iter().position(|byte| *byte == b'\n') {
      let line: Vec<u8> = self.buffer.drain(..=pos).collect();
      self.line(&String::from_utf8_lossy(&line), &mut events)?;
    }
    Ok(events)
  }

  fn finish(mut self) -> Result<Vec<ResponseEvent>> {
    let mut events = Vec::new();
    let rest = std::mem::take(&mut self.buffer);
    self.line(&String::from_utf8_lossy(&rest), &mut events)?;

    for (_, call) in std::mem::take(&mut self.calls) {
      if call.name.is_empty() {
        return Err(ModelError::InvalidResponse(
          "tool call without a function name".to_string(),
        ));
      }
      events.push(ResponseEvent::FunctionCall(FunctionCallEvent {
        id: call.id,
        call_type: "function".to_string(),
        function: FunctionCall {
          name: call.name,
          arguments: call.arguments,
        },
      }));
    }
    events.push(ResponseEvent::EndTurn);
    Ok(events)
  }

  fn line(&mut self, line: &str, events: &mut Vec<ResponseEvent>) -> Result<()> {
    if self.done {
      return Ok(());
    }
    let Some(payload) = line.trim().strip_prefix("data:") else {
      return Ok(());
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
      self.done = true;
      return Ok(());
    }

    let chunk: ChatChunk = serde_json::from_str(payload)?;
    if let Some(error) = chunk.error {
      events.push(ResponseEvent::Error(ResponseErrorEvent {
        message: error.message,
      }));
      return Ok(());
    }
    for choice in chunk.choices {
      if let Some(text) = choice.delta.content
        && !text.is_empty()
      {
        events.push(ResponseEvent::ContentDelta(ContentDeltaEvent {
          text,
          index: choice.index,
        }));
      }
      for delta in choice.delta.tool_calls.unwrap_or_default() {
        let pending = self.calls.entry(delta.index).or_default();
        if let Some(id) = delta.id {
          pending.id = id;
        }
        if let Some(function) = delta.function {
          if let Some(name) = function.name {
            pending.name.push_str(&name);
          }
          if let Some(arguments) = function.arguments {
            pending.arguments.push_str(&arguments);
          }
        }
      }
    }
    Ok(())
  }
}

use futures::StreamExt;
use serde_json::Value;
use tether_protocol::{FunctionCallEvent, ModelResponse, ResponseEvent, ToolCallRequest};

use crate::event::PresentationSink;
use crate::model::{ModelError, ResponseStream};

/// Fold a response stream into exactly one [`ModelResponse`], forwarding
/// text to the sink as it arrives.
pub(crate) async fn collect_response(
  mut stream: ResponseStream,
  sink: &dyn PresentationSink,
  turn: u64,
) -> Result<ModelResponse, ModelError> {
  let mut text = String::new();
  let mut calls = Vec::new();

  while let Some(event) = stream.next().await {
    match event? {
      ResponseEvent::ContentDelta(delta) => {
        if delta.text.is_empty() {
          continue;
        }
        sink.render_text(&delta.text).await;
        text.push_str(&delta.text);
      }
      ResponseEvent::FunctionCall(call) => {
        let index = calls.len();
        calls.push(tool_call_request(call, turn, index));
      }
      ResponseEvent::EndTurn => break,
      ResponseEvent::Error(err) => return Err(ModelError::StreamError(err.message)),
    }
  }

  if calls.is_empty() {
    return Ok(ModelResponse::FinalAnswer { text });
  }
  Ok(ModelResponse::ToolCallBatch {
    preamble: (!text.is_empty()).then_some(text),
    calls,
  })
}

/// Arguments that are not valid JSON are kept as a raw string, which fails
/// validation and is reported back to the model.
fn tool_call_request(call: FunctionCallEvent, turn: u64, index: usize) -> ToolCallRequest {
  let raw = call.function.arguments;
  let arguments = if raw.trim().is_empty() {
    Value::Object(Default::default())
  } else {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
  };
  let id = if call.id.is_empty() {
    format!("call_{turn}_{index}")
  } else {
    call.id
  };
  ToolCallRequest {
    id,
    tool_name: call.function.name,
    arguments,
    originating_turn: turn,
  }
}

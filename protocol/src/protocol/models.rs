use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Streamed model output, folded by the orchestrator into one `ModelResponse`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseEvent {
  /// Incremental assistant text chunk.
  ContentDelta(ContentDeltaEvent),
  /// Model-issued tool call.
  FunctionCall(FunctionCallEvent),
  /// Current model response turn is complete.
  EndTurn,
  /// Provider emitted an error event.
  Error(ResponseErrorEvent),
}

/// Text delta emitted by model streaming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentDeltaEvent {
  pub text: String,
  pub index: usize,
}

/// Function call event emitted by model streaming.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCallEvent {
  pub id: String,
  pub call_type: String,
  pub function: FunctionCall,
}

/// Function call payload. `arguments` is the raw JSON text the model produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
  pub name: String,
  pub arguments: String,
}

/// Provider-side error event in responses stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseErrorEvent {
  pub message: String,
}

/// Tool advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
  pub name: String,
  pub description: String,
  pub parameters: Value,
}

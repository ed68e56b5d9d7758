// Transcript Items
// Turns, tool calls and tool results as they are recorded in a session

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
  /// Correlation id, unique within its batch.
  pub id: String,
  pub tool_name: String,
  pub arguments: Value,
  /// Number of the model turn that produced this request.
  #[serde(default)]
  pub originating_turn: u64,
}

impl ToolCallRequest {
  pub fn new(id: impl Into<String>, tool_name: impl Into<String>, arguments: Value) -> Self {
    Self {
      id: id.into(),
      tool_name: tool_name.into(),
      arguments,
      originating_turn: 0,
    }
  }
}

/// What the model answered for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelResponse {
  FinalAnswer {
    text: String,
  },
  ToolCallBatch {
    /// Text the model streamed before asking for tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    preamble: Option<String>,
    calls: Vec<ToolCallRequest>,
  },
}

/// One model exchange. Immutable once appended to a transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
  pub number: u64,
  pub response: ModelResponse,
}

/// Ordered transcript entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptItem {
  User { text: String },
  Model(Turn),
  ToolResult(ToolResult),
}

/// How a sandboxed process finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecExit {
  Code(i32),
  Signal(i32),
}

impl fmt::Display for ExecExit {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExecExit::Code(code) => write!(f, "code {code}"),
      ExecExit::Signal(signal) => write!(f, "signal {signal}"),
    }
  }
}

/// Result shape shared by every sandbox strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecOutput {
  pub stdout: String,
  pub stderr: String,
  pub exit: ExecExit,
  pub duration_ms: u64,
}

impl ExecOutput {
  pub fn success(&self) -> bool {
    self.exit == ExecExit::Code(0)
  }
}

/// Successful tool output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutput {
  /// Text fed back to the model.
  pub content: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub exec: Option<ExecOutput>,
}

/// Reasons a single invocation can fail without ending the turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FailureKind {
  UnknownTool,
  InvalidArguments,
  UserDenied,
  ProviderUnavailable,
  ProviderError,
  SandboxViolation,
  Timeout,
  Cancelled,
  ExecutionFailed,
}

impl FailureKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      FailureKind::UnknownTool => "UnknownTool",
      FailureKind::InvalidArguments => "InvalidArguments",
      FailureKind::UserDenied => "UserDenied",
      FailureKind::ProviderUnavailable => "ProviderUnavailable",
      FailureKind::ProviderError => "ProviderError",
      FailureKind::SandboxViolation => "SandboxViolation",
      FailureKind::Timeout => "Timeout",
      FailureKind::Cancelled => "Cancelled",
      FailureKind::ExecutionFailed => "ExecutionFailed",
    }
  }
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFailure {
  pub kind: FailureKind,
  pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
  Success(ToolOutput),
  Failure(ToolFailure),
}

/// Result of one invocation, correlated to its request by `call_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
  pub call_id: String,
  pub tool_name: String,
  pub outcome: ToolOutcome,
}

impl ToolResult {
  pub fn success(call: &ToolCallRequest, output: ToolOutput) -> Self {
    Self {
      call_id: call.id.clone(),
      tool_name: call.tool_name.clone(),
      outcome: ToolOutcome::Success(output),
    }
  }

  pub fn failure(call: &ToolCallRequest, kind: FailureKind, message: impl Into<String>) -> Self {
    Self {
      call_id: call.id.clone(),
      tool_name: call.tool_name.clone(),
      outcome: ToolOutcome::Failure(ToolFailure {
        kind,
        message: message.into(),
      }),
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self.outcome, ToolOutcome::Success(_))
  }

  pub fn failure_kind(&self) -> Option<FailureKind> {
    match &self.outcome {
      ToolOutcome::Success(_) => None,
      ToolOutcome::Failure(failure) => Some(failure.kind),
    }
  }

  /// Text handed back to the model for this result.
  pub fn model_content(&self) -> String {
    match &self.outcome {
      ToolOutcome::Success(output) => output.content.clone(),
      ToolOutcome::Failure(failure) => serde_json::json!({
        "error": failure.kind.as_str(),
        "message": failure.message,
      })
      .to_string(),
    }
  }
}

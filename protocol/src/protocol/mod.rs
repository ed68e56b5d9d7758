// Tether Protocol Layer
// Events emitted towards front ends

mod config_types;
mod items;
mod models;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use config_types::*;
pub use items::*;
pub use models::*;

/// Events emitted while a turn runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMsg {
  TurnStarted(TurnStartedEvent),
  StateChanged(StateChangedEvent),
  AgentMessageDelta(AgentMessageDeltaEvent),
  ToolCallBegin(ToolCallBeginEvent),
  ApprovalRequest(ApprovalRequestEvent),
  ApprovalRetracted(ApprovalRetractedEvent),
  ToolCallEnd(ToolCallEndEvent),
  TurnCompleted(TurnCompletedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnStartedEvent {
  pub session_id: String,
  pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateChangedEvent {
  pub state: String,
  pub turn: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessageDeltaEvent {
  pub delta: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallBeginEvent {
  pub call_id: String,
  pub tool_name: String,
  pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRequestEvent {
  pub call_id: String,
  pub tool_name: String,
  pub arguments: Value,
  /// Human-readable rendering of the arguments.
  pub rendered: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalRetractedEvent {
  pub call_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallEndEvent {
  pub result: ToolResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnCompletedEvent {
  pub final_message: Option<String>,
  pub terminated: Option<String>,
}

// Presentation Sink
// Where the agent loop sends what the operator sees, and where approvals come from

mod channel;

pub use channel::ChannelSink;

use async_trait::async_trait;
use tether_protocol::{
  AgentMessageDeltaEvent, ApprovalRequestEvent, EventMsg, ReviewDecision, ToolCallBeginEvent,
  ToolCallEndEvent, ToolCallRequest, ToolResult,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
  #[error("presentation sink is closed")]
  Closed,
  #[error("approval request was withdrawn")]
  Retracted,
}

/// Front end of a session.
///
/// Only `emit` and `prompt_approval` are required; the render hooks default
/// to emitting the matching [`EventMsg`].
#[async_trait]
pub trait PresentationSink: Send + Sync {
  async fn emit(&self, event: EventMsg);

  /// Block until the operator answers. Resolves to [`SinkError::Retracted`]
  /// when [`PresentationSink::retract_approval`] withdraws the request.
  async fn prompt_approval(&self, request: ApprovalRequestEvent) -> Result<ReviewDecision, SinkError>;

  async fn retract_approval(&self, call_id: &str);

  async fn render_text(&self, chunk: &str) {
    self
      .emit(EventMsg::AgentMessageDelta(AgentMessageDeltaEvent {
        delta: chunk.to_string(),
      }))
      .await;
  }

  async fn render_tool_start(&self, call: &ToolCallRequest) {
    self
      .emit(EventMsg::ToolCallBegin(ToolCallBeginEvent {
        call_id: call.id.clone(),
        tool_name: call.tool_name.clone(),
        arguments: call.arguments.clone(),
      }))
      .await;
  }

  async fn render_tool_result(&self, result: &ToolResult) {
    self
      .emit(EventMsg::ToolCallEnd(ToolCallEndEvent {
        result: result.clone(),
      }))
      .await;
  }
}

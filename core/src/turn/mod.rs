//! Agent loop.
//!
//! Drives one user turn: ask the model, run whatever tools it asks for,
//! feed the results back, and stop on a final answer, the turn ceiling, a
//! model failure or cancellation.

mod outcome;
mod response;

pub use outcome::{LoopState, TerminationReason, TurnOutcome};

use std::sync::Arc;

use tether_config::OrchestratorConfig;
use tether_protocol::{
  EventMsg, ModelResponse, StateChangedEvent, TranscriptItem, Turn, TurnCompletedEvent,
  TurnStartedEvent,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::event::PresentationSink;
use crate::model::{ModelClient, ModelError, ModelRequest};
use crate::session::Session;
use crate::tools::{ToolCallRuntime, ToolRegistry};

pub struct Orchestrator {
  model: Arc<dyn ModelClient>,
  registry: Arc<ToolRegistry>,
  runtime: ToolCallRuntime,
  sink: Arc<dyn PresentationSink>,
  config: OrchestratorConfig,
  system_prompt: Option<String>,
}

impl Orchestrator {
  pub fn new(
    model: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    runtime: ToolCallRuntime,
    sink: Arc<dyn PresentationSink>,
    config: OrchestratorConfig,
    system_prompt: Option<String>,
  ) -> Self {
    Self {
      model,
      registry,
      runtime,
      sink,
      config,
      system_prompt,
    }
  }

  #[instrument(skip_all, fields(session = %session.id()))]
  pub async fn run_turn(&self, session: &mut Session, input: &str) -> TurnOutcome {
    let cancel = session.begin_turn();
    session.push(TranscriptItem::User {
      text: input.to_string(),
    });
    self
      .sink
      .emit(EventMsg::TurnStarted(TurnStartedEvent {
        session_id: session.id().to_string(),
        input: input.to_string(),
      }))
      .await;

    let outcome = self.drive(session, &cancel).await;
    session.end_turn();

    match &outcome {
      TurnOutcome::Done { text } => info!(chars = text.len(), "turn finished"),
      TurnOutcome::Terminated { reason } => warn!(%reason, "turn terminated"),
    }
    self
      .sink
      .emit(EventMsg::TurnCompleted(TurnCompletedEvent {
        final_message: outcome.final_text().map(str::to_string),
        terminated: outcome.termination().map(ToString::to_string),
      }))
      .await;
    outcome
  }

  async fn drive(&self, session: &mut Session, cancel: &CancellationToken) -> TurnOutcome {
    for _ in 0..self.config.max_turns {
      let number = session.next_turn_number();
      self.transition(LoopState::AwaitingModel, number).await;

      // Tools advertised and tools executed come from the same snapshot.
      let snapshot = self.registry.snapshot();
      let request = ModelRequest {
        system_prompt: self.system_prompt.clone(),
        transcript: session.windowed(self.config.history_window),
        tools: snapshot.definitions(),
      };
      let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return self.terminate(number, TerminationReason::Cancelled).await,
        response = self.request_model(request, number) => response,
      };
      let response = match response {
        Ok(response) => response,
        Err(err) => {
          return self
            .terminate(number, TerminationReason::ModelClient(err.to_string()))
            .await;
        }
      };

      self.transition(LoopState::InterpretingResponse, number).await;
      session.push(TranscriptItem::Model(Turn {
        number,
        response: response.clone(),
      }));

      match response {
        ModelResponse::FinalAnswer { text } => {
          self.transition(LoopState::Done, number).await;
          return TurnOutcome::Done { text };
        }
        ModelResponse::ToolCallBatch { calls, .. } => {
          self.transition(LoopState::ExecutingTools, number).await;
          debug!(calls = calls.len(), version = snapshot.version(), "executing batch");
          let results = self.runtime.execute_batch(&snapshot, &calls, cancel).await;
          for result in results {
            session.push(TranscriptItem::ToolResult(result));
          }
          if cancel.is_cancelled() {
            return self.terminate(number, TerminationReason::Cancelled).await;
          }
        }
      }
    }
    self
      .terminate(session.turn_count(), TerminationReason::TurnLimitReached)
      .await
  }

  async fn request_model(&self, request: ModelRequest, number: u64) -> Result<ModelResponse, ModelError> {
    let stream = self.model.stream(request).await?;
    response::collect_response(stream, self.sink.as_ref(), number).await
  }

  async fn terminate(&self, number: u64, reason: TerminationReason) -> TurnOutcome {
    self.transition(LoopState::Terminated, number).await;
    TurnOutcome::Terminated { reason }
  }

  async fn transition(&self, state: LoopState, turn: u64) {
    debug!(%state, turn, "loop state");
    self
      .sink
      .emit(EventMsg::StateChanged(StateChangedEvent {
        state: state.as_str().to_string(),
        turn,
      }))
      .await;
  }
}

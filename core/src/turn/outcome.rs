use std::fmt;

/// Agent loop states for one user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
  AwaitingModel,
  InterpretingResponse,
  ExecutingTools,
  Done,
  Terminated,
}

impl LoopState {
  pub fn as_str(&self) -> &'static str {
    match self {
      LoopState::AwaitingModel => "awaiting_model",
      LoopState::InterpretingResponse => "interpreting_response",
      LoopState::ExecutingTools => "executing_tools",
      LoopState::Done => "done",
      LoopState::Terminated => "terminated",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, LoopState::Done | LoopState::Terminated)
  }
}

impl fmt::Display for LoopState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
  TurnLimitReached,
  ModelClient(String),
  Cancelled,
}

impl fmt::Display for TerminationReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TerminationReason::TurnLimitReached => f.write_str("turn limit reached"),
      TerminationReason::ModelClient(message) => write!(f, "model client error: {message}"),
      TerminationReason::Cancelled => f.write_str("cancelled"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
  Done { text: String },
  Terminated { reason: TerminationReason },
}

impl TurnOutcome {
  pub fn is_done(&self) -> bool {
    matches!(self, TurnOutcome::Done { .. })
  }

  pub fn final_text(&self) -> Option<&str> {
    match self {
      TurnOutcome::Done { text } => Some(text),
      TurnOutcome::Terminated { .. } => None,
    }
  }

  pub fn termination(&self) -> Option<&TerminationReason> {
    match self {
      TurnOutcome::Done { .. } => None,
      TurnOutcome::Terminated { reason } => Some(reason),
    }
  }
}

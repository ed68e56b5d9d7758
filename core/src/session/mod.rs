mod interrupt;

pub use interrupt::InterruptHandle;

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tether_protocol::TranscriptItem;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::approval::ApprovalLog;

/// One interactive run: the transcript, the session-scoped approvals and the
/// turn counter. Owned by whoever drives the agent loop.
pub struct Session {
  id: Uuid,
  created_at: DateTime<Utc>,
  transcript: Vec<TranscriptItem>,
  approvals: Arc<ApprovalLog>,
  turn_counter: u64,
  root: CancellationToken,
  current_turn: Arc<Mutex<Option<CancellationToken>>>,
}

impl Session {
  pub fn new(approvals: Arc<ApprovalLog>) -> Self {
    Self {
      id: Uuid::new_v4(),
      created_at: Utc::now(),
      transcript: Vec::new(),
      approvals,
      turn_counter: 0,
      root: CancellationToken::new(),
      current_turn: Arc::new(Mutex::new(None)),
    }
  }

  pub fn id(&self) -> Uuid {
    self.id
  }

  pub fn created_at(&self) -> DateTime<Utc> {
    self.created_at
  }

  pub fn transcript(&self) -> &[TranscriptItem] {
    &self.transcript
  }

  pub fn push(&mut self, item: TranscriptItem) {
    self.transcript.push(item);
  }

  pub fn approvals(&self) -> &Arc<ApprovalLog> {
    &self.approvals
  }

  /// Number of model exchanges so far.
  pub fn turn_count(&self) -> u64 {
    self.turn_counter
  }

  pub(crate) fn next_turn_number(&mut self) -> u64 {
    self.turn_counter += 1;
    self.turn_counter
  }

  /// Token for a new user turn, a child of the session token.
  pub(crate) fn begin_turn(&self) -> CancellationToken {
    let token = self.root.child_token();
    *self
      .current_turn
      .lock()
      .unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
    token
  }

  pub(crate) fn end_turn(&self) {
    self
      .current_turn
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
  }

  pub fn is_shut_down(&self) -> bool {
    self.root.is_cancelled()
  }

  pub fn interrupt_handle(&self) -> InterruptHandle {
    InterruptHandle::new(self.root.clone(), self.current_turn.clone())
  }

  /// The most recent `window` items. A window never starts with tool
  /// results whose calls fell outside it.
  pub fn windowed(&self, window: Option<usize>) -> Vec<TranscriptItem> {
    let Some(window) = window else {
      return self.transcript.clone();
    };
    let start = self.transcript.len().saturating_sub(window);
    self.transcript[start..]
      .iter()
      .skip_while(|item| matches!(item, TranscriptItem::ToolResult(_)))
      .cloned()
      .collect()
  }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tether_protocol::{ApprovalRequestEvent, ApprovalRetractedEvent, EventMsg, ReviewDecision};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{PresentationSink, SinkError};

type PendingApprovals = HashMap<String, oneshot::Sender<ReviewDecision>>;

/// Sink that forwards every event over an `mpsc` channel.
///
/// Approval prompts park a oneshot keyed by call id; the front end answers
/// through [`ChannelSink::resolve_approval`].
#[derive(Clone)]
pub struct ChannelSink {
  tx: mpsc::Sender<EventMsg>,
  pending: Arc<Mutex<PendingApprovals>>,
}

impl ChannelSink {
  pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventMsg>) {
    let (tx, rx) = mpsc::channel(capacity);
    let sink = Self {
      tx,
      pending: Arc::new(Mutex::new(HashMap::new())),
    };
    (sink, rx)
  }

  /// Answer a pending prompt. False when nothing is waiting on `call_id`.
  pub fn resolve_approval(&self, call_id: &str, decision: ReviewDecision) -> bool {
    let Some(tx) = self.lock_pending().remove(call_id) else {
      return false;
    };
    tx.send(decision).is_ok()
  }

  pub fn pending_approvals(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.lock_pending().keys().cloned().collect();
    ids.sort();
    ids
  }

  fn lock_pending(&self) -> std::sync::MutexGuard<'_, PendingApprovals> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

#[async_trait]
impl PresentationSink for ChannelSink {
  async fn emit(&self, event: EventMsg) {
    if self.tx.send(event).await.is_err() {
      debug!("event receiver dropped");
    }
  }

  async fn prompt_approval(&self, request: ApprovalRequestEvent) -> Result<ReviewDecision, SinkError> {
    let call_id = request.call_id.clone();
    let (tx, rx) = oneshot::channel();
    self.lock_pending().insert(call_id.clone(), tx);

    if self.tx.send(EventMsg::ApprovalRequest(request)).await.is_err() {
      self.lock_pending().remove(&call_id);
      return Err(SinkError::Closed);
    }
    rx.await.map_err(|_| SinkError::Retracted)
  }

  async fn retract_approval(&self, call_id: &str) {
    if self.lock_pending().remove(call_id).is_none() {
      return;
    }
    self
      .emit(EventMsg::ApprovalRetracted(ApprovalRetractedEvent {
        call_id: call_id.to_string(),
      }))
      .await;
  }
}

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cancels a session's work from another task (a Ctrl-C handler, a UI).
#[derive(Clone)]
pub struct InterruptHandle {
  root: CancellationToken,
  current_turn: Arc<Mutex<Option<CancellationToken>>>,
}

impl InterruptHandle {
  pub(crate) fn new(
    root: CancellationToken,
    current_turn: Arc<Mutex<Option<CancellationToken>>>,
  ) -> Self {
    Self { root, current_turn }
  }

  /// Cancel the running turn. False when no turn is running.
  pub fn interrupt(&self) -> bool {
    let current = self
      .current_turn
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone();
    match current {
      Some(token) if !token.is_cancelled() => {
        info!("interrupting current turn");
        token.cancel();
        true
      }
      _ => false,
    }
  }

  /// Cancel the session and everything running under it.
  pub fn shutdown(&self) {
    self.root.cancel();
  }
}

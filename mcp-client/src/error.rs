use std::io;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Failures talking to an external provider.
#[derive(Debug, Error)]
pub enum ClientError {
  #[error("failed to spawn provider process: {0}")]
  Spawn(#[source] io::Error),

  #[error("failed to connect to provider: {0}")]
  Connect(#[source] io::Error),

  #[error("provider handshake failed: {0}")]
  Handshake(String),

  #[error("provider connection closed")]
  Disconnected,

  #[error("provider did not answer within {0:?}")]
  Timeout(Duration),

  #[error("provider returned error {code}: {message}")]
  Rpc {
    code: i64,
    message: String,
    data: Option<Value>,
  },

  #[error("malformed provider message: {0}")]
  Protocol(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

impl ClientError {
  /// True when the transport is gone rather than the request being bad.
  pub fn is_disconnect(&self) -> bool {
    matches!(self, ClientError::Disconnected)
  }
}

//! Model layer error types

use thiserror::Error;

/// Failures talking to the model. Any of these ends the turn.
#[derive(Error, Debug)]
pub enum ModelError {
  /// Missing or rejected credentials
  #[error("Authentication failed: {0}")]
  AuthError(String),

  /// Non-success HTTP status
  #[error("Provider API error (HTTP {status}): {body}")]
  ApiError { status: u16, body: String },

  /// Network error
  #[error("Network error: {0}")]
  NetworkError(#[from] reqwest::Error),

  /// JSON parse error
  #[error("JSON parse error: {0}")]
  JsonError(#[from] serde_json::Error),

  /// Provider reported an error mid-stream
  #[error("Streaming error: {0}")]
  StreamError(String),

  /// Response did not fit the expected shape
  #[error("Invalid response: {0}")]
  InvalidResponse(String),
}

/// Alias for Result<T, ModelError>
pub type Result<T> = std::result::Result<T, ModelError>;

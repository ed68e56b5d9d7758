use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_protocol::FailureKind;

/// Shared tool runtime context.
#[derive(Debug, Clone)]
pub struct ToolContext {
  pub cwd: PathBuf,
}

impl ToolContext {
  pub fn new(cwd: PathBuf) -> Self {
    Self { cwd }
  }

  /// Resolve a tool-supplied path against the working directory.
  pub fn resolve(&self, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.cwd.join(path)
    }
  }
}

impl Default for ToolContext {
  fn default() -> Self {
    Self {
      cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
  }
}

pub fn parse_arguments<T: DeserializeOwned>(
  tool: &str,
  arguments: &Value,
) -> Result<T, FunctionCallError> {
  T::deserialize(arguments)
    .map_err(|e| FunctionCallError::InvalidArguments(format!("invalid arguments for {tool}: {e}")))
}

/// Tool invocation failures raised by builtin handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FunctionCallError {
  #[error("{0}")]
  InvalidArguments(String),
  #[error("{0}")]
  Execution(String),
}

impl FunctionCallError {
  pub fn kind(&self) -> FailureKind {
    match self {
      FunctionCallError::InvalidArguments(_) => FailureKind::InvalidArguments,
      FunctionCallError::Execution(_) => FailureKind::ExecutionFailed,
    }
  }
}

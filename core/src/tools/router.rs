use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tether_config::ToolsConfig;
use tether_protocol::{FailureKind, ToolCallRequest, ToolResult};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::mcp::McpConnectionManager;
use crate::sandbox::SandboxExecutor;
use crate::tools::context::ToolContext;
use crate::tools::handlers::ToolHandler;
use crate::tools::spec::{ToolDescriptor, ToolSource};

/// How a descriptor is executed, picked from its source.
#[derive(Clone)]
pub enum Executable {
  /// Builtin handler run through the sandbox executor.
  Local(Arc<dyn ToolHandler>),
  /// Forwarded to an external provider.
  Remote { server_id: String },
}

pub struct ToolRouter {
  handlers: HashMap<String, Arc<dyn ToolHandler>>,
  sandbox: Arc<SandboxExecutor>,
  mcp: McpConnectionManager,
  context: ToolContext,
  config: ToolsConfig,
}

impl ToolRouter {
  pub fn new(
    handlers: Vec<Arc<dyn ToolHandler>>,
    sandbox: Arc<SandboxExecutor>,
    mcp: McpConnectionManager,
    context: ToolContext,
    config: ToolsConfig,
  ) -> Self {
    let handlers = handlers
      .into_iter()
      .map(|handler| (handler.descriptor().name, handler))
      .collect();
    Self {
      handlers,
      sandbox,
      mcp,
      context,
      config,
    }
  }

  pub fn executable(&self, descriptor: &ToolDescriptor) -> Option<Executable> {
    match &descriptor.source {
      ToolSource::Builtin => self
        .handlers
        .get(&descriptor.name)
        .cloned()
        .map(Executable::Local),
      ToolSource::External(server_id) => Some(Executable::Remote {
        server_id: server_id.clone(),
      }),
    }
  }

  /// Per-invocation deadline: a per-tool override, then the provider's
  /// `tool_timeout_ms`, then the default.
  pub fn deadline_for(&self, descriptor: &ToolDescriptor) -> Duration {
    let provider = descriptor
      .source
      .server_id()
      .and_then(|server_id| self.mcp.tool_timeout(server_id));
    match (self.config.timeouts.get(&descriptor.name), provider) {
      (Some(ms), _) => Duration::from_millis(*ms),
      (None, Some(provider)) => provider,
      (None, None) => Duration::from_millis(self.config.default_timeout_ms),
    }
  }

  /// Run one authorized call. Every failure comes back as a result.
  pub async fn dispatch(
    &self,
    descriptor: &ToolDescriptor,
    call: &ToolCallRequest,
    deadline: Duration,
    cancel: &CancellationToken,
  ) -> ToolResult {
    match self.executable(descriptor) {
      Some(Executable::Local(handler)) => {
        let command = match handler.command(&call.arguments, &self.context) {
          Ok(command) => command,
          Err(err) => return ToolResult::failure(call, err.kind(), err.to_string()),
        };
        let exec = match self
          .sandbox
          .execute(&descriptor.name, &command, deadline, cancel)
          .await
        {
          Ok(exec) => exec,
          Err(err) => return ToolResult::failure(call, err.kind(), err.to_string()),
        };
        match handler.output(exec) {
          Ok(output) => ToolResult::success(call, output),
          Err(err) => ToolResult::failure(call, err.kind(), err.to_string()),
        }
      }
      Some(Executable::Remote { server_id }) => {
        match self
          .mcp
          .call_tool(&server_id, &descriptor.name, call.arguments.clone(), deadline, cancel)
          .await
        {
          Ok(output) => ToolResult::success(call, output),
          Err(err) => ToolResult::failure(call, err.kind(), err.to_string()),
        }
      }
      None => {
        warn!(tool = %descriptor.name, "registered builtin has no handler");
        ToolResult::failure(
          call,
          FailureKind::UnknownTool,
          format!("no handler for builtin tool `{}`", descriptor.name),
        )
      }
    }
  }
}

use std::sync::Arc;

use anyhow::Context;
use tether_config::Config;
use tracing::info;

use crate::approval::{ApprovalLog, ConfirmationGate};
use crate::event::PresentationSink;
use crate::mcp::McpConnectionManager;
use crate::model::ModelClient;
use crate::sandbox::{SandboxExecutor, SandboxProfile};
use crate::session::{InterruptHandle, Session};
use crate::tools::context::ToolContext;
use crate::tools::handlers::builtin_handlers;
use crate::tools::{ToolCallRuntime, ToolRegistry, ToolRouter, register_builtins};
use crate::turn::{Orchestrator, TurnOutcome};

/// A running session with everything wired together.
pub struct Tether {
  config: Arc<Config>,
  session: Session,
  orchestrator: Orchestrator,
  registry: Arc<ToolRegistry>,
  mcp: McpConnectionManager,
  sandbox: Arc<SandboxExecutor>,
}

impl Tether {
  /// Build the session: builtin tools, the sandbox profile (fixed from here
  /// on), trusted approvals, and every enabled tool provider.
  pub async fn new(
    config: Config,
    model: Arc<dyn ModelClient>,
    sink: Arc<dyn PresentationSink>,
  ) -> anyhow::Result<Self> {
    let cwd = match &config.tools.cwd {
      Some(cwd) => cwd.clone(),
      None => std::env::current_dir().context("failed to resolve working directory")?,
    };

    let registry = Arc::new(ToolRegistry::new());
    let handlers = builtin_handlers();
    register_builtins(&registry, &handlers).context("failed to register builtin tools")?;

    let profile =
      SandboxProfile::from_config(&config.sandbox, &cwd).context("invalid sandbox configuration")?;
    let sandbox = Arc::new(
      SandboxExecutor::new(profile, &config.sandbox).context("failed to prepare the sandbox")?,
    );

    let approvals = Arc::new(
      ApprovalLog::from_config(&config.approval).context("invalid trusted approval pattern")?,
    );

    let mcp = McpConnectionManager::new(registry.clone(), &config.mcp);
    mcp
      .connect_all()
      .await
      .context("failed to connect a required tool provider")?;

    let router = Arc::new(ToolRouter::new(
      handlers,
      sandbox.clone(),
      mcp.clone(),
      ToolContext::new(cwd),
      config.tools.clone(),
    ));
    let gate = Arc::new(ConfirmationGate::new(
      approvals.clone(),
      sink.clone(),
      config.approval.granularity,
    ));
    let runtime = ToolCallRuntime::new(
      router,
      gate,
      sink.clone(),
      config.orchestrator.parallel_tool_calls,
    );
    let orchestrator = Orchestrator::new(
      model,
      registry.clone(),
      runtime,
      sink,
      config.orchestrator.clone(),
      config.models.system_prompt.clone(),
    );

    let session = Session::new(approvals);
    info!(
      session = %session.id(),
      sandbox = sandbox.strategy_name(),
      tools = registry.snapshot().len(),
      "session started"
    );

    Ok(Self {
      config: Arc::new(config),
      session,
      orchestrator,
      registry,
      mcp,
      sandbox,
    })
  }

  pub async fn run_turn(&mut self, input: &str) -> TurnOutcome {
    self.orchestrator.run_turn(&mut self.session, input).await
  }

  pub fn interrupt_handle(&self) -> InterruptHandle {
    self.session.interrupt_handle()
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn registry(&self) -> &Arc<ToolRegistry> {
    &self.registry
  }

  pub fn mcp(&self) -> &McpConnectionManager {
    &self.mcp
  }

  pub fn sandbox(&self) -> &SandboxExecutor {
    &self.sandbox
  }

  /// Cancel outstanding work, close providers and release the sandbox.
  pub async fn shutdown(self) {
    self.session.interrupt_handle().shutdown();
    self.mcp.shutdown_all();
    self.sandbox.shutdown().await;
    info!(session = %self.session.id(), "session closed");
  }
}

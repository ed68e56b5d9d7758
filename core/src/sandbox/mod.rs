//! Sandbox executor.
//!
//! Every builtin tool lowers to a [`CommandSpec`]; the session's
//! [`SandboxProfile`] picks one [`ExecStrategy`] at startup and every
//! invocation goes through it, so callers see the same [`ExecOutput`] shape
//! whichever isolation is active.

mod container;
mod process;
mod restrictive;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tether_config::{NetworkPolicy, SandboxConfig, SandboxStrategyKind};
use tether_protocol::{ExecOutput, FailureKind};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use container::ContainerStrategy;
pub use process::DirectStrategy;
pub use restrictive::RestrictiveStrategy;

/// Audit log target for isolation breaches.
pub const AUDIT_TARGET: &str = "tether::audit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxStrategy {
  None,
  RestrictiveOs,
  Container { image: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemScope {
  pub writable_roots: Vec<PathBuf>,
  pub readable_roots: Vec<PathBuf>,
  pub read_anywhere: bool,
}

/// Isolation applied to every tool process for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxProfile {
  pub strategy: SandboxStrategy,
  pub filesystem: FilesystemScope,
  pub network: NetworkPolicy,
}

impl SandboxProfile {
  /// Build the profile from configuration. Relative roots resolve against
  /// `cwd`, and `cwd` itself is writable when no roots are configured.
  pub fn from_config(config: &SandboxConfig, cwd: &Path) -> Result<Self, SandboxError> {
    let strategy = match config.strategy {
      SandboxStrategyKind::None => SandboxStrategy::None,
      SandboxStrategyKind::RestrictiveOs => SandboxStrategy::RestrictiveOs,
      SandboxStrategyKind::Container => {
        let image = config.image.clone().ok_or_else(|| {
          SandboxError::Setup("the container strategy needs `sandbox.image`".to_string())
        })?;
        SandboxStrategy::Container { image }
      }
    };

    let absolute = |root: &PathBuf| {
      if root.is_absolute() {
        root.clone()
      } else {
        cwd.join(root)
      }
    };
    let mut writable_roots: Vec<PathBuf> = config
      .filesystem
      .writable_roots
      .iter()
      .map(absolute)
      .collect();
    if writable_roots.is_empty() {
      writable_roots.push(cwd.to_path_buf());
    }

    Ok(Self {
      strategy,
      filesystem: FilesystemScope {
        writable_roots,
        readable_roots: config
          .filesystem
          .readable_roots
          .iter()
          .map(absolute)
          .collect(),
        read_anywhere: config.filesystem.read_anywhere,
      },
      network: config.network,
    })
  }

  /// True when `path` sits under a writable root, where the profile allows
  /// everything and a refusal can only come from ordinary file permissions.
  pub fn allows_everything_at(&self, path: &Path) -> bool {
    self
      .filesystem
      .writable_roots
      .iter()
      .any(|root| path.starts_with(root))
  }

  pub fn unrestricted(cwd: &Path) -> Self {
    Self {
      strategy: SandboxStrategy::None,
      filesystem: FilesystemScope {
        writable_roots: vec![cwd.to_path_buf()],
        readable_roots: Vec::new(),
        read_anywhere: true,
      },
      network: NetworkPolicy::Allow,
    }
  }
}

/// A process to run: what every builtin tool lowers to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
  pub program: String,
  pub args: Vec<String>,
  pub cwd: PathBuf,
  pub env: Vec<(String, String)>,
  /// Bytes written to the process's stdin before it is closed.
  pub stdin: Option<String>,
}

impl CommandSpec {
  pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      cwd: cwd.into(),
      ..Default::default()
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn stdin(mut self, input: impl Into<String>) -> Self {
    self.stdin = Some(input.into());
    self
  }
}

#[derive(Debug, Error)]
pub enum SandboxError {
  #[error("failed to start process: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("deadline of {0:?} exceeded")]
  Timeout(Duration),

  #[error("cancelled")]
  Cancelled,

  #[error("sandbox denied access: {0}")]
  Violation(String),

  #[error("sandbox setup failed: {0}")]
  Setup(String),

  #[error("{0}")]
  Unsupported(String),

  #[error("container error: {0}")]
  Container(String),
}

impl SandboxError {
  pub fn kind(&self) -> FailureKind {
    match self {
      SandboxError::Timeout(_) => FailureKind::Timeout,
      SandboxError::Cancelled => FailureKind::Cancelled,
      SandboxError::Violation(_) => FailureKind::SandboxViolation,
      SandboxError::Spawn(_)
      | SandboxError::Setup(_)
      | SandboxError::Unsupported(_)
      | SandboxError::Container(_) => FailureKind::ExecutionFailed,
    }
  }
}

/// One isolation mechanism.
#[async_trait]
pub trait ExecStrategy: Send + Sync {
  fn name(&self) -> &'static str;

  async fn run(
    &self,
    command: &CommandSpec,
    deadline: Duration,
    cancel: &CancellationToken,
  ) -> Result<ExecOutput, SandboxError>;

  /// Release anything held for the session (containers).
  async fn shutdown(&self) {}
}

pub struct SandboxExecutor {
  profile: Arc<SandboxProfile>,
  strategy: Arc<dyn ExecStrategy>,
}

impl SandboxExecutor {
  /// Select the strategy once for the session.
  pub fn new(profile: SandboxProfile, container_config: &SandboxConfig) -> Result<Self, SandboxError> {
    let profile = Arc::new(profile);
    let strategy: Arc<dyn ExecStrategy> = match &profile.strategy {
      SandboxStrategy::None => Arc::new(DirectStrategy),
      SandboxStrategy::RestrictiveOs => Arc::new(RestrictiveStrategy::new(
        profile.clone(),
        container_config.linux_helper.clone(),
      )?),
      SandboxStrategy::Container { image } => Arc::new(ContainerStrategy::new(
        profile.clone(),
        image.clone(),
        container_config,
      )),
    };
    info!(strategy = strategy.name(), "sandbox strategy selected");
    Ok(Self { profile, strategy })
  }

  pub fn with_strategy(profile: SandboxProfile, strategy: Arc<dyn ExecStrategy>) -> Self {
    Self {
      profile: Arc::new(profile),
      strategy,
    }
  }

  pub fn profile(&self) -> &SandboxProfile {
    &self.profile
  }

  pub fn strategy_name(&self) -> &'static str {
    self.strategy.name()
  }

  pub async fn execute(
    &self,
    tool: &str,
    command: &CommandSpec,
    deadline: Duration,
    cancel: &CancellationToken,
  ) -> Result<ExecOutput, SandboxError> {
    let output = self.strategy.run(command, deadline, cancel).await?;
    if self.profile.strategy == SandboxStrategy::None || output.success() {
      return Ok(output);
    }
    let Some(line) = denial_line(&output.stderr) else {
      return Ok(output);
    };
    let paths = absolute_paths(line);
    if !paths.is_empty() && paths.iter().all(|path| self.profile.allows_everything_at(path)) {
      return Ok(output);
    }

    warn!(
      target: AUDIT_TARGET,
      tool,
      strategy = self.strategy.name(),
      program = %command.program,
      "blocked: {line}"
    );
    Err(SandboxError::Violation(format!(
      "{line}\n[exit: {}]\n[stdout]\n{}\n[stderr]\n{}",
      output.exit, output.stdout, output.stderr
    )))
  }

  pub async fn shutdown(&self) {
    self.strategy.shutdown().await;
  }
}

/// First stderr line that reports an access-control refusal.
fn denial_line(stderr: &str) -> Option<&str> {
  const MARKERS: &[&str] = &[
    "Permission denied",
    "Operation not permitted",
    "Read-only file system",
  ];
  stderr
    .lines()
    .find(|line| MARKERS.iter().any(|marker| line.contains(marker)))
    .map(str::trim)
}

/// Absolute paths named in a tool's error line, quotes and colons stripped.
fn absolute_paths(line: &str) -> Vec<PathBuf> {
  line
    .split_whitespace()
    .map(|token| token.trim_matches(|c| matches!(c, '\'' | '"' | ':' | ',' | '`')))
    .filter(|token| token.starts_with('/'))
    .map(PathBuf::from)
    .collect()
}

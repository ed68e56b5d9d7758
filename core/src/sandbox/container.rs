use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tether_config::{NetworkPolicy, SandboxConfig};
use tether_protocol::ExecOutput;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::process::run_command;
use super::{CommandSpec, ExecStrategy, SandboxError, SandboxProfile};

/// Relays each invocation into one long-lived container per session.
///
/// The container mounts only the profile's roots (writable ones read-write,
/// readable ones read-only) and gets no network unless the profile allows it.
pub struct ContainerStrategy {
  profile: Arc<SandboxProfile>,
  image: String,
  runtime: String,
  startup_timeout: Duration,
  exec_timeout: Duration,
  container: OnceCell<String>,
}

impl ContainerStrategy {
  pub fn new(profile: Arc<SandboxProfile>, image: String, config: &SandboxConfig) -> Self {
    Self {
      profile,
      image,
      runtime: config.container_runtime.clone(),
      startup_timeout: Duration::from_millis(config.container_startup_timeout_ms),
      exec_timeout: Duration::from_millis(config.container_exec_timeout_ms),
      container: OnceCell::new(),
    }
  }

  async fn container_id(&self, cancel: &CancellationToken) -> Result<&str, SandboxError> {
    let id = self
      .container
      .get_or_try_init(|| self.start_container(cancel))
      .await?;
    Ok(id.as_str())
  }

  async fn start_container(&self, cancel: &CancellationToken) -> Result<String, SandboxError> {
    let spec = CommandSpec::new(&self.runtime, std::env::temp_dir()).args(self.run_args());
    let mut cmd = Command::new(&self.runtime);
    cmd.args(&spec.args);
    let output = run_command(cmd, &spec, self.startup_timeout, cancel).await?;
    if !output.success() {
      return Err(SandboxError::Container(format!(
        "`{} run` failed: {}",
        self.runtime,
        output.stderr.trim()
      )));
    }
    let id = output.stdout.trim().to_string();
    if id.is_empty() {
      return Err(SandboxError::Container(format!(
        "`{} run` printed no container id",
        self.runtime
      )));
    }
    info!(container = %id, image = %self.image, "sandbox container started");
    Ok(id)
  }

  pub(crate) fn run_args(&self) -> Vec<String> {
    let mut args = vec![
      "run".to_string(),
      "-d".to_string(),
      "--rm".to_string(),
      "--network".to_string(),
      match self.profile.network {
        NetworkPolicy::Deny => "none".to_string(),
        NetworkPolicy::Allow => "bridge".to_string(),
      },
    ];
    for root in &self.profile.filesystem.writable_roots {
      let root = root.display();
      args.push("-v".to_string());
      args.push(format!("{root}:{root}"));
    }
    for root in &self.profile.filesystem.readable_roots {
      let root = root.display();
      args.push("-v".to_string());
      args.push(format!("{root}:{root}:ro"));
    }
    args.push(self.image.clone());
    args.push("sleep".to_string());
    args.push("infinity".to_string());
    args
  }

  /// `exec` arguments. The wrapper records the shell's pid so a cancelled
  /// call can be killed inside the container, then `exec`s the command.
  pub(crate) fn exec_args(&self, container: &str, spec: &CommandSpec, pid_file: &str) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if spec.stdin.is_some() {
      args.push("-i".to_string());
    }
    args.push("-w".to_string());
    args.push(spec.cwd.display().to_string());
    for (key, value) in &spec.env {
      args.push("-e".to_string());
      args.push(format!("{key}={value}"));
    }
    args.push(container.to_string());
    args.push("sh".to_string());
    args.push("-c".to_string());
    args.push(format!("echo $$ > {pid_file}; exec \"$@\""));
    args.push("sh".to_string());
    args.push(spec.program.clone());
    args.extend(spec.args.iter().cloned());
    args
  }

  async fn kill_inside(&self, container: &str, pid_file: &str) {
    let script = format!("kill -9 $(cat {pid_file}) 2>/dev/null; rm -f {pid_file}");
    let result = Command::new(&self.runtime)
      .args(["exec", container, "sh", "-c", &script])
      .output()
      .await;
    if let Err(err) = result {
      warn!(container, "failed to kill relayed process: {err}");
    }
  }
}

#[async_trait]
impl ExecStrategy for ContainerStrategy {
  fn name(&self) -> &'static str {
    "container"
  }

  async fn run(
    &self,
    command: &CommandSpec,
    deadline: Duration,
    cancel: &CancellationToken,
  ) -> Result<ExecOutput, SandboxError> {
    let container = self.container_id(cancel).await?;
    let pid_file = format!("/tmp/tether-{}.pid", Uuid::new_v4().simple());
    let mut cmd = Command::new(&self.runtime);
    cmd.args(self.exec_args(container, command, &pid_file));

    // The relay has its own bound on top of the invocation deadline.
    let bound = deadline.min(self.exec_timeout);
    let mut relay = command.clone();
    relay.env.clear();
    relay.cwd = std::env::temp_dir();

    let result = run_command(cmd, &relay, bound, cancel).await;
    if matches!(
      result,
      Err(SandboxError::Timeout(_) | SandboxError::Cancelled)
    ) {
      self.kill_inside(container, &pid_file).await;
    }
    result
  }

  async fn shutdown(&self) {
    let Some(id) = self.container.get() else {
      return;
    };
    match Command::new(&self.runtime)
      .args(["rm", "-f", id])
      .output()
      .await
    {
      Ok(_) => debug!(container = %id, "sandbox container removed"),
      Err(err) => warn!(container = %id, "failed to remove sandbox container: {err}"),
    }
  }
}

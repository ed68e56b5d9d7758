use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tether_config::NetworkPolicy;
use tether_protocol::{ExecExit, ExecOutput};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::process::run_command;
use super::{CommandSpec, ExecStrategy, SandboxError, SandboxProfile};

const LINUX_HELPER: &str = "tether-linux-sandbox";
const HELPER_SETUP_FAILURE: i32 = 125;
#[cfg(target_os = "macos")]
const SEATBELT: &str = "/usr/bin/sandbox-exec";

/// Host access control: Landlock through the helper binary on Linux,
/// Seatbelt on macOS.
pub struct RestrictiveStrategy {
  profile: Arc<SandboxProfile>,
  launcher: Launcher,
}

enum Launcher {
  #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
  Landlock(PathBuf),
  #[cfg_attr(not(target_os = "macos"), allow(dead_code))]
  Seatbelt(String),
}

impl RestrictiveStrategy {
  pub fn new(profile: Arc<SandboxProfile>, helper: Option<PathBuf>) -> Result<Self, SandboxError> {
    let launcher = Self::launcher(&profile, helper)?;
    Ok(Self { profile, launcher })
  }

  #[cfg(target_os = "linux")]
  fn launcher(_profile: &SandboxProfile, helper: Option<PathBuf>) -> Result<Launcher, SandboxError> {
    let helper = helper
      .or_else(|| which::which(LINUX_HELPER).ok())
      .or_else(|| {
        std::env::current_exe()
          .ok()
          .and_then(|exe| exe.parent().map(|dir| dir.join(LINUX_HELPER)))
          .filter(|path| path.exists())
      })
      .ok_or_else(|| {
        SandboxError::Setup(format!(
          "`{LINUX_HELPER}` not found; install it or set `sandbox.linux_helper`"
        ))
      })?;
    Ok(Launcher::Landlock(helper))
  }

  #[cfg(target_os = "macos")]
  fn launcher(profile: &SandboxProfile, _helper: Option<PathBuf>) -> Result<Launcher, SandboxError> {
    Ok(Launcher::Seatbelt(seatbelt_profile(profile)))
  }

  #[cfg(not(any(target_os = "linux", target_os = "macos")))]
  fn launcher(_profile: &SandboxProfile, _helper: Option<PathBuf>) -> Result<Launcher, SandboxError> {
    Err(SandboxError::Unsupported(
      "the restrictive_os strategy is only available on linux and macos".to_string(),
    ))
  }

  fn command(&self, spec: &CommandSpec) -> Command {
    match &self.launcher {
      Launcher::Landlock(helper) => {
        let mut cmd = Command::new(helper);
        cmd.args(landlock_args(&self.profile));
        cmd.arg("--").arg(&spec.program).args(&spec.args);
        cmd
      }
      Launcher::Seatbelt(policy) => {
        #[cfg(target_os = "macos")]
        let program = SEATBELT;
        #[cfg(not(target_os = "macos"))]
        let program = "sandbox-exec";
        let mut cmd = Command::new(program);
        cmd
          .arg("-p")
          .arg(policy)
          .arg("--")
          .arg(&spec.program)
          .args(&spec.args);
        cmd
      }
    }
  }
}

#[async_trait]
impl ExecStrategy for RestrictiveStrategy {
  fn name(&self) -> &'static str {
    match self.launcher {
      Launcher::Landlock(_) => "landlock",
      Launcher::Seatbelt(_) => "seatbelt",
    }
  }

  async fn run(
    &self,
    command: &CommandSpec,
    deadline: Duration,
    cancel: &CancellationToken,
  ) -> Result<ExecOutput, SandboxError> {
    let output = run_command(self.command(command), command, deadline, cancel).await?;
    if matches!(self.launcher, Launcher::Landlock(_))
      && output.exit == ExecExit::Code(HELPER_SETUP_FAILURE)
      && output.stderr.starts_with(LINUX_HELPER)
    {
      return Err(SandboxError::Setup(output.stderr.trim().to_string()));
    }
    Ok(output)
  }
}

fn landlock_args(profile: &SandboxProfile) -> Vec<String> {
  let mut args = Vec::new();
  for root in &profile.filesystem.writable_roots {
    args.push("--writable".to_string());
    args.push(root.display().to_string());
  }
  for root in &profile.filesystem.readable_roots {
    args.push("--readable".to_string());
    args.push(root.display().to_string());
  }
  if profile.filesystem.read_anywhere {
    args.push("--read-anywhere".to_string());
  }
  if profile.network == NetworkPolicy::Deny {
    args.push("--deny-network".to_string());
  }
  args
}

/// Seatbelt policy equivalent to the Landlock rules.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub(crate) fn seatbelt_profile(profile: &SandboxProfile) -> String {
  let mut policy = String::from(
    "(version 1)\n(deny default)\n(allow process-exec)\n(allow process-fork)\n\
     (allow signal (target same-sandbox))\n(allow sysctl-read)\n(allow mach-lookup)\n",
  );
  if profile.filesystem.read_anywhere {
    policy.push_str("(allow file-read*)\n");
  } else {
    policy.push_str("(allow file-read-metadata)\n");
    let system: [&Path; 5] = [
      Path::new("/usr"),
      Path::new("/bin"),
      Path::new("/System"),
      Path::new("/Library"),
      Path::new("/private/etc"),
    ];
    let readable = system
      .iter()
      .map(|path| path.to_path_buf())
      .chain(profile.filesystem.readable_roots.iter().cloned())
      .chain(profile.filesystem.writable_roots.iter().cloned());
    for root in readable {
      policy.push_str(&format!("(allow file-read* (subpath {}))\n", quote(&root)));
    }
  }
  for root in &profile.filesystem.writable_roots {
    policy.push_str(&format!("(allow file-write* (subpath {}))\n", quote(root)));
  }
  policy.push_str("(allow file-write-data (literal \"/dev/null\"))\n");
  if profile.network == NetworkPolicy::Allow {
    policy.push_str("(allow network*)\n");
  }
  policy
}

#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn quote(path: &Path) -> String {
  let escaped = path
    .display()
    .to_string()
    .replace('\\', "\\\\")
    .replace('"', "\\\"");
  format!("\"{escaped}\"")
}

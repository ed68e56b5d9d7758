use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tether_protocol::{ExecExit, ExecOutput};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{CommandSpec, ExecStrategy, SandboxError};

/// No isolation: the command runs directly on the host.
pub struct DirectStrategy;

#[async_trait]
impl ExecStrategy for DirectStrategy {
  fn name(&self) -> &'static str {
    "none"
  }

  async fn run(
    &self,
    command: &CommandSpec,
    deadline: Duration,
    cancel: &CancellationToken,
  ) -> Result<ExecOutput, SandboxError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args);
    run_command(cmd, command, deadline, cancel).await
  }
}

/// How long pipes may stay open once the process group is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Spawn `cmd` (already pointing at the right program) and wait for it under
/// `deadline` and `cancel`. The process group never outlives the call.
pub(crate) async fn run_command(
  mut cmd: Command,
  spec: &CommandSpec,
  deadline: Duration,
  cancel: &CancellationToken,
) -> Result<ExecOutput, SandboxError> {
  cmd
    .current_dir(&spec.cwd)
    .envs(spec.env.iter().map(|(k, v)| (k, v)))
    .stdin(if spec.stdin.is_some() {
      Stdio::piped()
    } else {
      Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);
  #[cfg(unix)]
  cmd.process_group(0);

  let started = Instant::now();
  let mut child = cmd.spawn().map_err(SandboxError::Spawn)?;
  let pid = child.id();

  if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
    tokio::spawn(async move {
      if let Err(err) = stdin.write_all(input.as_bytes()).await {
        debug!("stdin write failed: {err}");
      }
    });
  }
  let stdout = child.stdout.take().map(Capture::start);
  let stderr = child.stderr.take().map(Capture::start);

  enum Finish {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
  }

  let finish = tokio::select! {
    status = child.wait() => Finish::Exited(status),
    _ = tokio::time::sleep(deadline) => Finish::TimedOut,
    _ = cancel.cancelled() => Finish::Cancelled,
  };

  let status = match finish {
    Finish::Exited(status) => status.map_err(SandboxError::Spawn)?,
    Finish::TimedOut => {
      kill_process_tree(pid, &mut child).await;
      return Err(SandboxError::Timeout(deadline));
    }
    Finish::Cancelled => {
      kill_process_tree(pid, &mut child).await;
      return Err(SandboxError::Cancelled);
    }
  };

  // Background children would keep the pipes open past the command.
  kill_group(pid);
  let stdout = Capture::finish(stdout).await;
  let stderr = Capture::finish(stderr).await;

  Ok(ExecOutput {
    stdout,
    stderr,
    exit: exit_of(status),
    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
  })
}

/// Pipe reader whose buffer stays readable if the pipe never closes.
struct Capture {
  buf: Arc<Mutex<Vec<u8>>>,
  task: JoinHandle<()>,
}

impl Capture {
  fn start<R: AsyncRead + Unpin + Send + 'static>(mut pipe: R) -> Self {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let sink = buf.clone();
    let task = tokio::spawn(async move {
      let mut chunk = [0u8; 8192];
      loop {
        match pipe.read(&mut chunk).await {
          Ok(0) | Err(_) => break,
          Ok(n) => sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(&chunk[..n]),
        }
      }
    });
    Self { buf, task }
  }

  /// Wait for EOF up to [`DRAIN_GRACE`], then take whatever was read.
  async fn finish(capture: Option<Self>) -> String {
    let Some(Capture { buf, mut task }) = capture else {
      return String::new();
    };
    if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
      debug!("output pipe still open after the process exited");
      task.abort();
    }
    let bytes = std::mem::take(&mut *buf.lock().unwrap_or_else(PoisonError::into_inner));
    String::from_utf8_lossy(&bytes).into_owned()
  }
}

fn exit_of(status: ExitStatus) -> ExecExit {
  if let Some(code) = status.code() {
    return ExecExit::Code(code);
  }
  #[cfg(unix)]
  {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = status.signal() {
      return ExecExit::Signal(signal);
    }
  }
  ExecExit::Code(-1)
}

/// SIGKILL the process group led by `pid`. A no-op once the group is empty.
fn kill_group(pid: Option<u32>) {
  #[cfg(unix)]
  if let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) {
    // SAFETY: signalling our own child's process group has no memory effects.
    unsafe {
      libc::kill(-pid, libc::SIGKILL);
    }
  }
  #[cfg(not(unix))]
  let _ = pid;
}

pub(crate) async fn kill_process_tree(pid: Option<u32>, child: &mut Child) {
  kill_group(pid);
  let _ = child.start_kill();
  let _ = child.wait().await;
}

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use rmcp::transport::TokioChildProcess;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use crate::client::McpClient;
use crate::error::ClientError;

/// Launch a provider as a child process and talk to it over its stdio.
///
/// Stderr is forwarded to the log at debug level.
pub async fn spawn_stdio(
  name: &str,
  command: &str,
  args: &[String],
  env: &HashMap<String, String>,
  cwd: Option<&Path>,
) -> Result<McpClient, ClientError> {
  let mut cmd = Command::new(command);
  cmd.args(args).envs(env).kill_on_drop(true);
  if let Some(cwd) = cwd {
    cmd.current_dir(cwd);
  }

  let (process, stderr) = TokioChildProcess::builder(cmd)
    .stderr(Stdio::piped())
    .spawn()
    .map_err(ClientError::Spawn)?;

  if let Some(stderr) = stderr {
    let server = name.to_string();
    tokio::spawn(async move {
      let mut lines = BufReader::new(stderr).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %server, "stderr: {line}");
      }
    });
  }

  debug!(server = name, command, "spawned provider process");
  McpClient::serve(name, process).await
}

/// Connect to a provider listening on `host:port`.
pub async fn connect_tcp(name: &str, address: &str) -> Result<McpClient, ClientError> {
  let stream = TcpStream::connect(address)
    .await
    .map_err(ClientError::Connect)?;
  let (reader, writer) = stream.into_split();
  debug!(server = name, address, "connected to provider");
  McpClient::from_stream(name, reader, writer).await
}

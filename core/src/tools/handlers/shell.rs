use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tether_protocol::{ExecExit, ExecOutput, MutabilityClass, ToolOutput};

use crate::sandbox::CommandSpec;
use crate::tools::context::{FunctionCallError, ToolContext, parse_arguments};
use crate::tools::handlers::ToolHandler;
use crate::tools::spec::{ToolDescriptor, obj, str_field};

pub struct ShellHandler;

#[derive(Debug, Deserialize)]
struct ShellArgs {
  command: String,
  workdir: Option<String>,
}

impl ToolHandler for ShellHandler {
  fn descriptor(&self) -> ToolDescriptor {
    let mut props = BTreeMap::new();
    props.insert("command".to_string(), str_field("Shell command"));
    props.insert("workdir".to_string(), str_field("Working directory"));
    ToolDescriptor::builtin(
      "shell",
      "Execute a shell command",
      obj(props, &["command"]),
      MutabilityClass::Mutating,
    )
  }

  fn command(&self, arguments: &Value, ctx: &ToolContext) -> Result<CommandSpec, FunctionCallError> {
    let args: ShellArgs = parse_arguments("shell", arguments)?;
    if args.command.trim().is_empty() {
      return Err(FunctionCallError::InvalidArguments(
        "command must not be empty".to_string(),
      ));
    }
    let cwd = match &args.workdir {
      Some(workdir) => ctx.resolve(workdir),
      None => ctx.cwd.clone(),
    };
    Ok(CommandSpec::new("sh", cwd).args(["-c".to_string(), args.command]))
  }

  /// A non-zero exit is still a result the model should read, not a failure.
  fn output(&self, exec: ExecOutput) -> Result<ToolOutput, FunctionCallError> {
    let status = match exec.exit {
      ExecExit::Code(code) => format!("exit_code: {code}\n"),
      ExecExit::Signal(signal) => format!("signal: {signal}\n"),
    };
    let mut content = status;
    for (label, stream) in [("stdout", &exec.stdout), ("stderr", &exec.stderr)] {
      if stream.is_empty() {
        continue;
      }
      content.push_str(label);
      content.push_str(":\n");
      content.push_str(stream);
      if !content.ends_with('\n') {
        content.push('\n');
      }
    }
    Ok(ToolOutput {
      content,
      exec: Some(exec),
    })
  }
}

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tether_protocol::{ExecOutput, MutabilityClass, ToolOutput};

use crate::sandbox::CommandSpec;
use crate::tools::context::{FunctionCallError, ToolContext, parse_arguments};
use crate::tools::handlers::{ToolHandler, failure_message};
use crate::tools::spec::{ToolDescriptor, bool_field, obj, str_field};

pub struct ListFilesHandler;

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
  path: String,
  #[serde(default)]
  recursive: Option<bool>,
}

impl ToolHandler for ListFilesHandler {
  fn descriptor(&self) -> ToolDescriptor {
    let mut props = BTreeMap::new();
    props.insert("path".to_string(), str_field("Directory to list"));
    props.insert(
      "recursive".to_string(),
      bool_field("Include entries of subdirectories"),
    );
    ToolDescriptor::builtin(
      "list_files",
      "List the entries of a directory",
      obj(props, &["path"]),
      MutabilityClass::ReadOnly,
    )
  }

  fn command(&self, arguments: &Value, ctx: &ToolContext) -> Result<CommandSpec, FunctionCallError> {
    let args: ListFilesArgs = parse_arguments("list_files", arguments)?;
    let path = ctx.resolve(&args.path).display().to_string();
    let command = if args.recursive.unwrap_or(false) {
      CommandSpec::new("find", &ctx.cwd).args([path.as_str(), "-mindepth", "1"])
    } else {
      CommandSpec::new("ls", &ctx.cwd).args(["-1Ap", "--", path.as_str()])
    };
    Ok(command)
  }

  fn output(&self, exec: ExecOutput) -> Result<ToolOutput, FunctionCallError> {
    if !exec.success() {
      return Err(FunctionCallError::Execution(failure_message(&exec)));
    }
    let mut entries: Vec<&str> = exec.stdout.lines().filter(|line| !line.is_empty()).collect();
    entries.sort_unstable();
    Ok(ToolOutput {
      content: entries.join("\n"),
      exec: Some(exec),
    })
  }
}

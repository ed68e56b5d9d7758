use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tether_protocol::{ExecOutput, MutabilityClass, ToolOutput};

use crate::sandbox::CommandSpec;
use crate::tools::context::{FunctionCallError, ToolContext, parse_arguments};
use crate::tools::handlers::{ToolHandler, failure_message};
use crate::tools::spec::{ToolDescriptor, obj, str_field};

pub struct DeleteFileHandler;

#[derive(Debug, Deserialize)]
struct DeleteFileArgs {
  path: String,
}

impl ToolHandler for DeleteFileHandler {
  fn descriptor(&self) -> ToolDescriptor {
    let mut props = BTreeMap::new();
    props.insert("path".to_string(), str_field("File to delete"));
    ToolDescriptor::builtin(
      "delete_file",
      "Delete a single file",
      obj(props, &["path"]),
      MutabilityClass::Mutating,
    )
  }

  fn command(&self, arguments: &Value, ctx: &ToolContext) -> Result<CommandSpec, FunctionCallError> {
    let args: DeleteFileArgs = parse_arguments("delete_file", arguments)?;
    let path = ctx.resolve(&args.path).display().to_string();
    Ok(CommandSpec::new("rm", &ctx.cwd).args(["--", path.as_str()]))
  }

  fn output(&self, exec: ExecOutput) -> Result<ToolOutput, FunctionCallError> {
    if !exec.success() {
      return Err(FunctionCallError::Execution(failure_message(&exec)));
    }
    Ok(ToolOutput {
      content: "deleted".to_string(),
      exec: Some(exec),
    })
  }
}

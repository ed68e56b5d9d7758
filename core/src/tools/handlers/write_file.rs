use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tether_protocol::{ExecOutput, MutabilityClass, ToolOutput};

use crate::sandbox::CommandSpec;
use crate::tools::context::{FunctionCallError, ToolContext, parse_arguments};
use crate::tools::handlers::{ToolHandler, failure_message};
use crate::tools::spec::{ToolDescriptor, obj, str_field};

pub struct WriteFileHandler;

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
  path: String,
  content: String,
}

// Parent directories are created; the content arrives on stdin so it never
// passes through argv.
const WRITE_SCRIPT: &str = "mkdir -p \"$(dirname \"$1\")\" && cat > \"$1\"";

impl ToolHandler for WriteFileHandler {
  fn descriptor(&self) -> ToolDescriptor {
    let mut props = BTreeMap::new();
    props.insert("path".to_string(), str_field("File path"));
    props.insert("content".to_string(), str_field("File content"));
    ToolDescriptor::builtin(
      "write_file",
      "Write content to a file, replacing it if it exists",
      obj(props, &["path", "content"]),
      MutabilityClass::Mutating,
    )
  }

  fn command(&self, arguments: &Value, ctx: &ToolContext) -> Result<CommandSpec, FunctionCallError> {
    let args: WriteFileArgs = parse_arguments("write_file", arguments)?;
    let path = ctx.resolve(&args.path).display().to_string();
    Ok(
      CommandSpec::new("sh", &ctx.cwd)
        .args(["-c", WRITE_SCRIPT, "sh", path.as_str()])
        .stdin(args.content),
    )
  }

  fn output(&self, exec: ExecOutput) -> Result<ToolOutput, FunctionCallError> {
    if !exec.success() {
      return Err(FunctionCallError::Execution(failure_message(&exec)));
    }
    Ok(ToolOutput {
      content: "ok".to_string(),
      exec: Some(exec),
    })
  }
}

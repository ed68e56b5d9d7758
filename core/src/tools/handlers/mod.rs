pub mod delete_file;
pub mod list_files;
pub mod read_file;
pub mod shell;
pub mod write_file;

use std::sync::Arc;

use serde_json::Value;
use tether_protocol::{ExecOutput, ToolOutput};

use crate::sandbox::CommandSpec;
use crate::tools::context::{FunctionCallError, ToolContext};
use crate::tools::spec::ToolDescriptor;

/// A builtin tool. Handlers never touch the host themselves: they lower
/// their arguments to a [`CommandSpec`] that the sandbox executor runs, then
/// turn the process output into the text the model sees.
pub trait ToolHandler: Send + Sync {
  fn descriptor(&self) -> ToolDescriptor;

  fn command(&self, arguments: &Value, ctx: &ToolContext) -> Result<CommandSpec, FunctionCallError>;

  fn output(&self, exec: ExecOutput) -> Result<ToolOutput, FunctionCallError> {
    if !exec.success() {
      return Err(FunctionCallError::Execution(failure_message(&exec)));
    }
    Ok(ToolOutput {
      content: exec.stdout.clone(),
      exec: Some(exec),
    })
  }
}

pub fn builtin_handlers() -> Vec<Arc<dyn ToolHandler>> {
  vec![
    Arc::new(list_files::ListFilesHandler),
    Arc::new(read_file::ReadFileHandler),
    Arc::new(write_file::WriteFileHandler),
    Arc::new(delete_file::DeleteFileHandler),
    Arc::new(shell::ShellHandler),
  ]
}

pub(crate) fn failure_message(exec: &ExecOutput) -> String {
  let stderr = exec.stderr.trim();
  if stderr.is_empty() {
    format!("process exited with {:?}", exec.exit)
  } else {
    stderr.to_string()
  }
}

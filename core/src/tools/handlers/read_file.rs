use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use tether_protocol::MutabilityClass;

use crate::sandbox::CommandSpec;
use crate::tools::context::{FunctionCallError, ToolContext, parse_arguments};
use crate::tools::handlers::ToolHandler;
use crate::tools::spec::{ToolDescriptor, int_field, obj, str_field};

pub struct ReadFileHandler;

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
  path: String,
  offset: Option<usize>,
  limit: Option<usize>,
}

impl ToolHandler for ReadFileHandler {
  fn descriptor(&self) -> ToolDescriptor {
    let mut props = BTreeMap::new();
    props.insert("path".to_string(), str_field("File path"));
    props.insert("offset".to_string(), int_field("Lines to skip"));
    props.insert("limit".to_string(), int_field("Maximum lines"));
    ToolDescriptor::builtin(
      "read_file",
      "Read text file content",
      obj(props, &["path"]),
      MutabilityClass::ReadOnly,
    )
  }

  fn command(&self, arguments: &Value, ctx: &ToolContext) -> Result<CommandSpec, FunctionCallError> {
    let args: ReadFileArgs = parse_arguments("read_file", arguments)?;
    let path = ctx.resolve(&args.path).display().to_string();

    if args.offset.is_none() && args.limit.is_none() {
      return Ok(CommandSpec::new("cat", &ctx.cwd).args(["--", path.as_str()]));
    }
    if args.limit == Some(0) {
      return Err(FunctionCallError::InvalidArguments(
        "limit must be at least 1".to_string(),
      ));
    }

    let start = args.offset.unwrap_or(0) + 1;
    let range = match args.limit {
      Some(limit) => format!("{start},{}p", start + limit - 1),
      None => format!("{start},$p"),
    };
    Ok(CommandSpec::new("sed", &ctx.cwd).args(["-n", range.as_str(), "--", path.as_str()]))
  }
}

use tether_config::McpServerConfig;
use tether_mcp_client::McpTool;
use tether_protocol::MutabilityClass;

use crate::tools::spec::ToolDescriptor;

/// Turn a provider's advertised tools into registry descriptors, applying
/// the server's filters. Anything not known to be read-only is Mutating.
pub(crate) fn descriptors_for(
  server_id: &str,
  config: &McpServerConfig,
  tools: Vec<McpTool>,
) -> Vec<ToolDescriptor> {
  tools
    .into_iter()
    .filter(|tool| config.allows_tool(&tool.name))
    .map(|tool| {
      let mutability = mutability_of(config, &tool);
      ToolDescriptor::external(
        server_id,
        tool.name,
        tool.description.unwrap_or_default(),
        tool.input_schema,
        mutability,
      )
    })
    .collect()
}

fn mutability_of(config: &McpServerConfig, tool: &McpTool) -> MutabilityClass {
  if config.read_only_tools.iter().any(|name| name == &tool.name) {
    return MutabilityClass::ReadOnly;
  }
  let hinted_read_only = tool
    .annotations
    .as_ref()
    .and_then(|annotations| annotations.read_only_hint)
    .unwrap_or(false);
  if config.trust_annotations && hinted_read_only {
    MutabilityClass::ReadOnly
  } else {
    MutabilityClass::Mutating
  }
}

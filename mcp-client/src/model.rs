//! Provider payloads as the orchestrator sees them.
//!
//! `rmcp` values are converted through their MCP wire form, so only the
//! fields used here have to line up.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// What the provider reported about itself during the handshake.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
  #[serde(rename = "protocolVersion")]
  pub protocol_version: String,
  #[serde(default)]
  pub capabilities: Value,
  #[serde(rename = "serverInfo", default)]
  pub server_info: Option<Implementation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Implementation {
  pub name: String,
  #[serde(default)]
  pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct McpTool {
  pub name: String,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(rename = "inputSchema", default = "empty_object_schema")]
  pub input_schema: Value,
  #[serde(default)]
  pub annotations: Option<ToolAnnotations>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ToolAnnotations {
  #[serde(rename = "readOnlyHint", default)]
  pub read_only_hint: Option<bool>,
}

fn empty_object_schema() -> Value {
  serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
  #[serde(rename = "text")]
  Text { text: String },
  #[serde(other)]
  Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CallToolResult {
  #[serde(default)]
  pub content: Vec<ContentBlock>,
  #[serde(rename = "isError", default)]
  pub is_error: Option<bool>,
  #[serde(rename = "structuredContent", default)]
  pub structured_content: Option<Value>,
}

impl CallToolResult {
  pub fn is_error(&self) -> bool {
    self.is_error.unwrap_or(false)
  }

  /// Text blocks joined by newlines; structured content when there is no text.
  pub fn text(&self) -> String {
    let parts: Vec<&str> = self
      .content
      .iter()
      .filter_map(|block| match block {
        ContentBlock::Text { text } => Some(text.as_str()),
        ContentBlock::Other => None,
      })
      .collect();
    if parts.is_empty()
      && let Some(structured) = &self.structured_content
    {
      return structured.to_string();
    }
    parts.join("\n")
  }
}

/// JSON-RPC error object carried by a failed request.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
  pub code: i64,
  pub message: String,
  #[serde(default)]
  pub data: Option<Value>,
}

/// Re-read an `rmcp` value as one of ours.
pub(crate) fn convert<T, U>(value: &T) -> Result<U, ClientError>
where
  T: Serialize,
  U: DeserializeOwned,
{
  Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

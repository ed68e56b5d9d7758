use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_protocol::{MutabilityClass, ToolDefinition};

/// JSON schema representation for tool input contracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JsonSchema {
  String {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Integer {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Boolean {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
  },
  Object {
    properties: BTreeMap<String, JsonSchema>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<Vec<String>>,
  },
}

impl JsonSchema {
  pub fn to_value(&self) -> Value {
    serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "type": "object" }))
  }
}

/// Where a tool comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSource {
  Builtin,
  /// Advertised by the named external provider.
  External(String),
}

impl ToolSource {
  pub fn server_id(&self) -> Option<&str> {
    match self {
      ToolSource::Builtin => None,
      ToolSource::External(server) => Some(server),
    }
  }
}

impl fmt::Display for ToolSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ToolSource::Builtin => f.write_str("builtin"),
      ToolSource::External(server) => write!(f, "server `{server}`"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
  pub name: String,
  pub description: String,
  /// JSON schema for the arguments object.
  pub parameters: Value,
  pub mutability: MutabilityClass,
  pub source: ToolSource,
}

impl ToolDescriptor {
  pub fn builtin(
    name: impl Into<String>,
    description: impl Into<String>,
    schema: JsonSchema,
    mutability: MutabilityClass,
  ) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      parameters: schema.to_value(),
      mutability,
      source: ToolSource::Builtin,
    }
  }

  pub fn external(
    server_id: impl Into<String>,
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: Value,
    mutability: MutabilityClass,
  ) -> Self {
    Self {
      name: name.into(),
      description: description.into(),
      parameters,
      mutability,
      source: ToolSource::External(server_id.into()),
    }
  }

  pub fn is_mutating(&self) -> bool {
    self.mutability == MutabilityClass::Mutating
  }

  pub fn to_definition(&self) -> ToolDefinition {
    ToolDefinition {
      name: self.name.clone(),
      description: self.description.clone(),
      parameters: self.parameters.clone(),
    }
  }
}

pub fn obj(properties: BTreeMap<String, JsonSchema>, required: &[&str]) -> JsonSchema {
  JsonSchema::Object {
    properties,
    required: if required.is_empty() {
      None
    } else {
      Some(required.iter().map(|s| s.to_string()).collect())
    },
  }
}

pub fn str_field(desc: &str) -> JsonSchema {
  JsonSchema::String {
    description: Some(desc.to_string()),
  }
}

pub fn int_field(desc: &str) -> JsonSchema {
  JsonSchema::Integer {
    description: Some(desc.to_string()),
  }
}

pub fn bool_field(desc: &str) -> JsonSchema {
  JsonSchema::Boolean {
    description: Some(desc.to_string()),
  }
}

// Configuration Types
// All configuration type definitions

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Approval policy settings
  pub approval: ApprovalConfig,
  /// Sandbox profile selection
  pub sandbox: SandboxConfig,
  /// External tool providers
  pub mcp: McpConfig,
  /// Agent loop limits
  pub orchestrator: OrchestratorConfig,
  /// Builtin tool settings
  pub tools: ToolsConfig,
  /// Model configuration
  pub models: ModelsConfig,
  /// Default log filter when RUST_LOG is unset
  pub log_level: Option<String>,
  /// Named overlays selected with `--profile`
  pub profiles: HashMap<String, toml::Value>,
}

// ============================================================================
// APPROVAL POLICY
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
  /// What a session-wide approval is keyed on
  pub granularity: ApprovalGranularity,
  /// Rules treated as session-wide approvals from the start
  pub trusted: Vec<TrustedRule>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalGranularity {
  /// An approval covers every call of the tool
  #[default]
  Tool,
  /// An approval covers only calls with identical arguments
  Arguments,
}

/// Pre-approved tool, optionally narrowed by a glob over the canonical JSON arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedRule {
  pub tool: String,
  #[serde(default)]
  pub arguments: Option<String>,
}

// ============================================================================
// SANDBOX CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
  pub strategy: SandboxStrategyKind,
  /// Container image, required for the container strategy
  pub image: Option<String>,
  /// Container CLI (`docker`, `podman`)
  pub container_runtime: String,
  pub container_startup_timeout_ms: u64,
  /// Upper bound for one relayed exec, independent of the tool deadline
  pub container_exec_timeout_ms: u64,
  pub filesystem: FilesystemScopeConfig,
  pub network: NetworkPolicy,
  /// Path of the `tether-linux-sandbox` helper
  pub linux_helper: Option<PathBuf>,
}

impl Default for SandboxConfig {
  fn default() -> Self {
    Self {
      strategy: SandboxStrategyKind::None,
      image: None,
      container_runtime: "docker".to_string(),
      container_startup_timeout_ms: 60_000,
      container_exec_timeout_ms: 300_000,
      filesystem: FilesystemScopeConfig::default(),
      network: NetworkPolicy::Deny,
      linux_helper: None,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStrategyKind {
  #[default]
  None,
  RestrictiveOs,
  Container,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemScopeConfig {
  /// Writable directories; the working directory when empty
  pub writable_roots: Vec<PathBuf>,
  /// Extra readable directories when `read_anywhere` is off
  pub readable_roots: Vec<PathBuf>,
  pub read_anywhere: bool,
}

impl Default for FilesystemScopeConfig {
  fn default() -> Self {
    Self {
      writable_roots: Vec::new(),
      readable_roots: Vec::new(),
      read_anywhere: true,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
  #[default]
  Deny,
  Allow,
}

// ============================================================================
// MCP CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
  /// Servers in connection order
  pub servers: IndexMap<String, McpServerConfig>,
  /// What to do when two providers advertise the same tool name
  pub duplicate_tools: DuplicateToolPolicy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateToolPolicy {
  /// Fail the later provider's registration
  #[default]
  Reject,
  /// Drop the colliding tool, keep the rest of the provider
  Skip,
  /// Register the colliding tool as `<server>__<tool>`
  Qualify,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
  pub transport: McpServerTransportConfig,
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Startup fails when a required server cannot connect
  #[serde(default)]
  pub required: bool,
  #[serde(default)]
  pub startup_timeout_ms: Option<u64>,
  #[serde(default)]
  pub tool_timeout_ms: Option<u64>,
  #[serde(default)]
  pub enabled_tools: Option<Vec<String>>,
  #[serde(default)]
  pub disabled_tools: Option<Vec<String>>,
  /// Tools treated as read-only regardless of annotations
  #[serde(default)]
  pub read_only_tools: Vec<String>,
  /// Honour the provider's `readOnlyHint` annotation
  #[serde(default)]
  pub trust_annotations: bool,
}

impl McpServerConfig {
  pub fn new(transport: McpServerTransportConfig) -> Self {
    Self {
      transport,
      enabled: true,
      required: false,
      startup_timeout_ms: None,
      tool_timeout_ms: None,
      enabled_tools: None,
      disabled_tools: None,
      read_only_tools: Vec::new(),
      trust_annotations: false,
    }
  }

  pub fn startup_timeout(&self) -> Duration {
    Duration::from_millis(self.startup_timeout_ms.unwrap_or(10_000))
  }

  /// Whether the filters let `tool` through.
  pub fn allows_tool(&self, tool: &str) -> bool {
    if let Some(enabled) = &self.enabled_tools
      && !enabled.iter().any(|name| name == tool)
    {
      return false;
    }
    if let Some(disabled) = &self.disabled_tools
      && disabled.iter().any(|name| name == tool)
    {
      return false;
    }
    true
  }
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpServerTransportConfig {
  /// Child process speaking over stdin/stdout
  Stdio {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
  },
  /// Plain TCP socket, `host:port`
  Tcp { address: String },
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
  /// Model exchanges allowed per user turn
  pub max_turns: u32,
  pub parallel_tool_calls: bool,
  /// Most recent transcript items sent to the model
  pub history_window: Option<usize>,
}

impl Default for OrchestratorConfig {
  fn default() -> Self {
    Self {
      max_turns: 20,
      parallel_tool_calls: true,
      history_window: None,
    }
  }
}

// ============================================================================
// TOOLS
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
  pub default_timeout_ms: u64,
  /// Per-tool deadline overrides
  pub timeouts: HashMap<String, u64>,
  /// Working directory for builtin tools
  pub cwd: Option<PathBuf>,
}

impl Default for ToolsConfig {
  fn default() -> Self {
    Self {
      default_timeout_ms: 120_000,
      timeouts: HashMap::new(),
      cwd: None,
    }
  }
}

impl ToolsConfig {
  pub fn timeout_for(&self, tool: &str) -> Duration {
    Duration::from_millis(
      self
        .timeouts
        .get(tool)
        .copied()
        .unwrap_or(self.default_timeout_ms),
    )
  }
}

// ============================================================================
// MODELS CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
  /// Model provider
  pub provider: String,
  /// Model name
  pub model: String,
  /// Base URL for API
  pub base_url: Option<String>,
  /// Environment variable holding the API key
  pub api_key_env: String,
  pub system_prompt: Option<String>,
}

impl Default for ModelsConfig {
  fn default() -> Self {
    Self {
      provider: "openai".to_string(),
      model: "gpt-4o".to_string(),
      base_url: None,
      api_key_env: "OPENAI_API_KEY".to_string(),
      system_prompt: None,
    }
  }
}

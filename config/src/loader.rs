// Configuration Loader
// Layered configuration loading system

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use toml::map::Map;
use tracing::debug;

use crate::layered::{ConfigLayer, ConfigLayerSource, LayeredConfig};
use crate::types::Config;

const CONFIG_DIR: &str = ".tether";
const CONFIG_FILE: &str = "config.toml";

/// Configuration loader with layered support
pub struct ConfigLoader {
  /// Global config directory
  global_dir: PathBuf,
  /// Project config directory
  project_dir: Option<PathBuf>,
  /// Profile overlay to apply
  profile: Option<String>,
}

impl ConfigLoader {
  pub fn new() -> Self {
    let global_dir = dirs::home_dir()
      .unwrap_or_else(|| PathBuf::from("."))
      .join(CONFIG_DIR);

    Self {
      global_dir,
      project_dir: None,
      profile: None,
    }
  }

  pub fn with_global_dir(mut self, dir: PathBuf) -> Self {
    self.global_dir = dir;
    self
  }

  pub fn with_project_dir(mut self, dir: PathBuf) -> Self {
    self.project_dir = Some(dir);
    self
  }

  pub fn with_profile(mut self, profile: Option<String>) -> Self {
    self.profile = profile;
    self
  }

  /// Load configuration with CLI overrides.
  ///
  /// Layers, lowest precedence first: built-in defaults, global config
  /// (`~/.tether/config.toml`), project config (`.tether/config.toml`),
  /// the selected profile, then `key=value` overrides.
  pub fn load_with_cli_overrides(&self, cli_overrides: Vec<(String, String)>) -> Result<Config> {
    let mut layered = LayeredConfig::new();

    if let Some(values) = read_layer(&self.global_dir.join(CONFIG_FILE))? {
      layered.add_layer(ConfigLayer {
        source: ConfigLayerSource::GlobalConfig,
        values,
      });
    }

    if let Some(project_dir) = &self.project_dir
      && let Some(values) = read_layer(&project_dir.join(CONFIG_DIR).join(CONFIG_FILE))?
    {
      layered.add_layer(ConfigLayer {
        source: ConfigLayerSource::ProjectConfig,
        values,
      });
    }

    if let Some(profile) = &self.profile {
      let merged = layered.merge();
      let Some(values) = merged
        .get("profiles")
        .and_then(|profiles| profiles.get(profile))
        .cloned()
      else {
        bail!("Unknown profile: {profile}");
      };
      layered.add_layer(ConfigLayer {
        source: ConfigLayerSource::Profile(profile.clone()),
        values,
      });
    }

    for (key, value) in cli_overrides {
      layered.add_layer(ConfigLayer {
        source: ConfigLayerSource::CliOverride,
        values: override_layer(&key, &value)?,
      });
    }

    debug!(sources = ?layered.sources(), "merging configuration layers");
    layered
      .merge()
      .try_into::<Config>()
      .context("invalid configuration")
  }
}

impl Default for ConfigLoader {
  fn default() -> Self {
    Self::new()
  }
}

/// Split a `KEY=VALUE` override.
pub fn parse_override(raw: &str) -> Result<(String, String)> {
  let Some((key, value)) = raw.split_once('=') else {
    bail!("Invalid override (expected KEY=VALUE): {raw}");
  };
  Ok((key.trim().to_string(), value.trim().to_string()))
}

fn read_layer(path: &Path) -> Result<Option<toml::Value>> {
  if !path.exists() {
    return Ok(None);
  }
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read {}", path.display()))?;
  let table: Map<String, toml::Value> =
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
  Ok(Some(toml::Value::Table(table)))
}

/// Build a nested table for a dotted key. The value is parsed as TOML when
/// possible (`true`, `5`, `["a"]`) and kept as a string otherwise.
fn override_layer(key: &str, raw: &str) -> Result<toml::Value> {
  let segments: Vec<&str> = key.split('.').collect();
  if segments.iter().any(|segment| segment.is_empty()) {
    bail!("Invalid config key: {key}");
  }

  let mut value = toml::from_str::<Map<String, toml::Value>>(&format!("value = {raw}"))
    .ok()
    .and_then(|mut table| table.remove("value"))
    .unwrap_or_else(|| toml::Value::String(raw.to_string()));

  for segment in segments.iter().rev() {
    let mut table = Map::new();
    table.insert((*segment).to_string(), value);
    value = toml::Value::Table(table);
  }
  Ok(value)
}

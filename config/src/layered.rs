// Layered Configuration
// Support for layered configuration with precedence

use toml::map::Map;

/// Ordered stack of configuration layers; later layers win.
#[derive(Debug, Clone, Default)]
pub struct LayeredConfig {
  layers: Vec<ConfigLayer>,
}

/// Configuration layer with source tracking
#[derive(Debug, Clone)]
pub struct ConfigLayer {
  pub source: ConfigLayerSource,
  pub values: toml::Value,
}

/// Configuration layer source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLayerSource {
  /// Global user config
  GlobalConfig,
  /// Project-specific config
  ProjectConfig,
  /// Named profile overlay
  Profile(String),
  /// CLI override
  CliOverride,
}

impl LayeredConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_layer(&mut self, layer: ConfigLayer) {
    self.layers.push(layer);
  }

  pub fn sources(&self) -> Vec<ConfigLayerSource> {
    self.layers.iter().map(|layer| layer.source.clone()).collect()
  }

  /// Deep-merge every layer into one table. Tables merge key by key,
  /// any other value replaces what came before.
  pub fn merge(&self) -> toml::Value {
    let mut merged = Map::new();
    for layer in &self.layers {
      if let toml::Value::Table(table) = &layer.values {
        merge_tables(&mut merged, table);
      }
    }
    toml::Value::Table(merged)
  }
}

fn merge_tables(base: &mut Map<String, toml::Value>, overlay: &Map<String, toml::Value>) {
  for (key, value) in overlay {
    match (base.get_mut(key), value) {
      (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
        merge_tables(existing, incoming);
      }
      _ => {
        base.insert(key.clone(), value.clone());
      }
    }
  }
}

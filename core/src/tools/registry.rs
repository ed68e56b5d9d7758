use std::sync::{Arc, PoisonError, RwLock};

use indexmap::IndexMap;
use tether_config::DuplicateToolPolicy;
use tether_protocol::ToolDefinition;
use thiserror::Error;
use tracing::{debug, warn};

use crate::tools::spec::{ToolDescriptor, ToolSource};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
  #[error("tool `{name}` is already registered by {existing}")]
  DuplicateName { name: String, existing: ToolSource },

  #[error("tool `{0}` is not registered")]
  NotFound(String),
}

/// Immutable view of the registry at one version.
///
/// A batch pins one snapshot for its whole lifetime, so providers coming and
/// going mid-batch never change what an in-flight lookup sees.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
  version: u64,
  tools: IndexMap<String, Arc<ToolDescriptor>>,
  /// External servers in the order they first registered.
  server_order: Vec<String>,
}

impl RegistrySnapshot {
  pub fn version(&self) -> u64 {
    self.version
  }

  pub fn lookup(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
    self.tools.get(name).cloned()
  }

  /// Builtin tools first, then external tools grouped by connection order.
  pub fn list(&self) -> Vec<Arc<ToolDescriptor>> {
    let mut listed: Vec<Arc<ToolDescriptor>> = self
      .tools
      .values()
      .filter(|tool| tool.source == ToolSource::Builtin)
      .cloned()
      .collect();
    for server in &self.server_order {
      listed.extend(
        self
          .tools
          .values()
          .filter(|tool| tool.source.server_id() == Some(server.as_str()))
          .cloned(),
      );
    }
    listed
  }

  pub fn definitions(&self) -> Vec<ToolDefinition> {
    self
      .list()
      .iter()
      .map(|tool| tool.to_definition())
      .collect()
  }

  pub fn len(&self) -> usize {
    self.tools.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tools.is_empty()
  }

  fn insert(&mut self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
    if let Some(existing) = self.tools.get(&descriptor.name)
      && existing.source != descriptor.source
    {
      return Err(RegistryError::DuplicateName {
        name: descriptor.name,
        existing: existing.source.clone(),
      });
    }
    if let ToolSource::External(server) = &descriptor.source
      && !self.server_order.contains(server)
    {
      self.server_order.push(server.clone());
    }
    self
      .tools
      .insert(descriptor.name.clone(), Arc::new(descriptor));
    Ok(())
  }

  fn remove_source(&mut self, server_id: &str) -> usize {
    let before = self.tools.len();
    self
      .tools
      .retain(|_, tool| tool.source.server_id() != Some(server_id));
    self.server_order.retain(|server| server != server_id);
    before - self.tools.len()
  }
}

/// Name → descriptor table for builtin and external tools.
///
/// Writers build a fresh snapshot and swap it in; readers only ever clone
/// the current `Arc`.
#[derive(Debug, Default)]
pub struct ToolRegistry {
  current: RwLock<Arc<RegistrySnapshot>>,
}

/// One tool accepted by [`ToolRegistry::register_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredTool {
  /// Name in the registry (may be qualified).
  pub name: String,
  /// Name the provider advertised.
  pub advertised: String,
}

impl ToolRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
    self
      .current
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  /// Register one descriptor. Re-registering a name from the same source
  /// replaces it; a name held by another source is an error.
  pub fn register(&self, descriptor: ToolDescriptor) -> Result<(), RegistryError> {
    self.update(|next| next.insert(descriptor))
  }

  /// Replace everything `server_id` registered with `descriptors`.
  ///
  /// All-or-nothing under [`DuplicateToolPolicy::Reject`]; `Skip` drops just
  /// the colliding tools and `Qualify` renames them to `<server>__<tool>`.
  pub fn register_all(
    &self,
    server_id: &str,
    descriptors: Vec<ToolDescriptor>,
    policy: DuplicateToolPolicy,
  ) -> Result<Vec<RegisteredTool>, RegistryError> {
    self.update(|next| {
      next.remove_source(server_id);
      let mut registered = Vec::with_capacity(descriptors.len());
      for mut descriptor in descriptors {
        let advertised = descriptor.name.clone();
        match next.insert(descriptor.clone()) {
          Ok(()) => {}
          Err(err) => match policy {
            DuplicateToolPolicy::Reject => return Err(err),
            DuplicateToolPolicy::Skip => {
              warn!(server = server_id, tool = %advertised, "skipping duplicate tool: {err}");
              continue;
            }
            DuplicateToolPolicy::Qualify => {
              descriptor.name = format!("{server_id}__{advertised}");
              debug!(server = server_id, tool = %advertised, qualified = %descriptor.name, "qualifying duplicate tool");
              next.insert(descriptor.clone())?;
            }
          },
        }
        registered.push(RegisteredTool {
          name: descriptor.name,
          advertised,
        });
      }
      Ok(registered)
    })
  }

  pub fn lookup(&self, name: &str) -> Result<Arc<ToolDescriptor>, RegistryError> {
    self
      .snapshot()
      .lookup(name)
      .ok_or_else(|| RegistryError::NotFound(name.to_string()))
  }

  pub fn list(&self) -> Vec<Arc<ToolDescriptor>> {
    self.snapshot().list()
  }

  /// Drop every descriptor owned by `server_id`. Returns how many went away.
  pub fn unregister_all_from(&self, server_id: &str) -> usize {
    let removed = self.update(|next| Ok::<_, RegistryError>(next.remove_source(server_id)));
    let removed = removed.unwrap_or_default();
    if removed > 0 {
      debug!(server = server_id, removed, "unregistered provider tools");
    }
    removed
  }

  fn update<T>(
    &self,
    apply: impl FnOnce(&mut RegistrySnapshot) -> Result<T, RegistryError>,
  ) -> Result<T, RegistryError> {
    let mut current = self
      .current
      .write()
      .unwrap_or_else(PoisonError::into_inner);
    let mut next = RegistrySnapshot::clone(&current);
    let value = apply(&mut next)?;
    next.version += 1;
    *current = Arc::new(next);
    Ok(value)
  }
}

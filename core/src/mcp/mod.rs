//! External Protocol Client Manager.
//!
//! Owns one [`McpClient`] per configured provider and mirrors each
//! provider's tools into the [`ToolRegistry`]. A watcher task per connection
//! drops those tools the moment the transport closes and refreshes them when
//! the provider announces a changed list. Reconnecting is left to the caller.

mod discovery;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;
use tether_config::{DuplicateToolPolicy, McpConfig, McpServerConfig, McpServerTransportConfig};
use tether_mcp_client::{ClientError, McpClient, Notification, connect_tcp, spawn_stdio};
use tether_protocol::{FailureKind, ToolOutput};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::tools::registry::{RegistryError, ToolRegistry};

#[derive(Debug, Error)]
pub enum McpError {
  #[error("unknown provider `{0}`")]
  UnknownServer(String),

  #[error("provider `{0}` is not connected")]
  Unavailable(String),

  #[error("provider `{server}` failed to start: {source}")]
  Connect {
    server: String,
    #[source]
    source: ClientError,
  },

  #[error("provider `{server}` could not register its tools: {source}")]
  Registry {
    server: String,
    #[source]
    source: RegistryError,
  },

  #[error("{0}")]
  Provider(String),

  #[error("provider did not answer within {0:?}")]
  Timeout(Duration),

  #[error("cancelled")]
  Cancelled,
}

impl McpError {
  pub fn kind(&self) -> FailureKind {
    match self {
      McpError::UnknownServer(_) | McpError::Unavailable(_) | McpError::Connect { .. } => {
        FailureKind::ProviderUnavailable
      }
      McpError::Registry { .. } | McpError::Provider(_) => FailureKind::ProviderError,
      McpError::Timeout(_) => FailureKind::Timeout,
      McpError::Cancelled => FailureKind::Cancelled,
    }
  }
}

/// Status line for one configured provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
  pub id: String,
  pub enabled: bool,
  pub required: bool,
  pub connected: bool,
  /// Registry names of the tools this provider currently contributes.
  pub tools: Vec<String>,
}

#[derive(Clone)]
pub struct McpConnectionManager {
  inner: Arc<ManagerInner>,
}

struct ManagerInner {
  registry: Arc<ToolRegistry>,
  duplicate_policy: DuplicateToolPolicy,
  configs: Mutex<IndexMap<String, McpServerConfig>>,
  connections: Mutex<HashMap<String, Connection>>,
  generation: AtomicU64,
}

struct Connection {
  client: McpClient,
  generation: u64,
  /// Registry name to the name the provider advertised.
  tools: IndexMap<String, String>,
  watcher: JoinHandle<()>,
}

impl McpConnectionManager {
  pub fn new(registry: Arc<ToolRegistry>, config: &McpConfig) -> Self {
    Self {
      inner: Arc::new(ManagerInner {
        registry,
        duplicate_policy: config.duplicate_tools,
        configs: Mutex::new(config.servers.clone()),
        connections: Mutex::new(HashMap::new()),
        generation: AtomicU64::new(0),
      }),
    }
  }

  /// Connect every enabled provider in configuration order.
  ///
  /// A failing provider is logged and skipped unless it is `required`.
  pub async fn connect_all(&self) -> Result<(), McpError> {
    let servers: Vec<(String, McpServerConfig)> = lock(&self.inner.configs)
      .iter()
      .filter(|(_, config)| config.enabled)
      .map(|(id, config)| (id.clone(), config.clone()))
      .collect();

    for (server_id, config) in servers {
      match self.connect(&server_id).await {
        Ok(count) => info!(server = %server_id, tools = count, "provider connected"),
        Err(err) if config.required => return Err(err),
        Err(err) => warn!(server = %server_id, "skipping provider: {err}"),
      }
    }
    Ok(())
  }

  /// Open the configured transport for `server_id` and register its tools.
  /// Returns the number of tools registered.
  #[instrument(skip(self))]
  pub async fn connect(&self, server_id: &str) -> Result<usize, McpError> {
    let config = lock(&self.inner.configs)
      .get(server_id)
      .cloned()
      .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?;

    let connect_err = |source| McpError::Connect {
      server: server_id.to_string(),
      source,
    };
    let startup = config.startup_timeout();
    let opened = match &config.transport {
      McpServerTransportConfig::Stdio {
        command,
        args,
        env,
        cwd,
      } => tokio::time::timeout(
        startup,
        spawn_stdio(server_id, command, args, env, cwd.as_deref()),
      )
      .await,
      McpServerTransportConfig::Tcp { address } => {
        tokio::time::timeout(startup, connect_tcp(server_id, address)).await
      }
    };
    let client = opened
      .map_err(|_| connect_err(ClientError::Timeout(startup)))?
      .map_err(connect_err)?;

    self.attach(server_id, client, config).await
  }

  /// Register the tools of an initialized client, replacing any previous
  /// connection under the same id.
  pub async fn attach(
    &self,
    server_id: &str,
    client: McpClient,
    config: McpServerConfig,
  ) -> Result<usize, McpError> {
    let startup = config.startup_timeout();
    let connect_err = |source| McpError::Connect {
      server: server_id.to_string(),
      source,
    };

    let tools = match client.list_tools(startup).await {
      Ok(tools) => tools,
      Err(err) => {
        client.shutdown();
        return Err(connect_err(err));
      }
    };
    debug!(
      server = server_id,
      provider = client
        .server_info()
        .and_then(|info| info.server_info.as_ref())
        .map_or("unknown", |server| server.name.as_str()),
      advertised = tools.len(),
      "provider tools listed"
    );

    let descriptors = discovery::descriptors_for(server_id, &config, tools);
    let registered = match self
      .inner
      .registry
      .register_all(server_id, descriptors, self.inner.duplicate_policy)
    {
      Ok(registered) => registered,
      Err(source) => {
        client.shutdown();
        return Err(McpError::Registry {
          server: server_id.to_string(),
          source,
        });
      }
    };
    let count = registered.len();

    lock(&self.inner.configs).insert(server_id.to_string(), config);
    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let watcher = tokio::spawn(watch_connection(
      Arc::downgrade(&self.inner),
      server_id.to_string(),
      client.clone(),
      generation,
    ));
    let connection = Connection {
      client: client.clone(),
      generation,
      tools: registered
        .into_iter()
        .map(|tool| (tool.name, tool.advertised))
        .collect(),
      watcher,
    };
    let previous = lock(&self.inner.connections).insert(server_id.to_string(), connection);
    if let Some(previous) = previous {
      previous.close();
    }
    // The watcher may have seen the close before the entry existed.
    if client.is_closed() {
      self.inner.connection_lost(server_id, generation);
    }
    Ok(count)
  }

  /// Close the connection and drop its tools. Idempotent.
  pub fn disconnect(&self, server_id: &str) -> bool {
    let removed = lock(&self.inner.connections).remove(server_id);
    let Some(connection) = removed else {
      self.inner.registry.unregister_all_from(server_id);
      return false;
    };
    connection.close();
    self.inner.registry.unregister_all_from(server_id);
    info!(server = server_id, "provider disconnected");
    true
  }

  pub async fn reconnect(&self, server_id: &str) -> Result<usize, McpError> {
    self.disconnect(server_id);
    self.connect(server_id).await
  }

  /// Forward a call to the provider owning `tool_name`.
  ///
  /// Fails fast with [`McpError::Unavailable`] once the connection is gone,
  /// including for calls already in flight when it drops.
  pub async fn call_tool(
    &self,
    server_id: &str,
    tool_name: &str,
    arguments: Value,
    deadline: Duration,
    cancel: &CancellationToken,
  ) -> Result<ToolOutput, McpError> {
    let (client, advertised) = {
      let connections = lock(&self.inner.connections);
      let connection = connections
        .get(server_id)
        .filter(|connection| !connection.client.is_closed())
        .ok_or_else(|| McpError::Unavailable(server_id.to_string()))?;
      let advertised = connection
        .tools
        .get(tool_name)
        .cloned()
        .unwrap_or_else(|| tool_name.to_string());
      (connection.client.clone(), advertised)
    };

    let result = tokio::select! {
      _ = cancel.cancelled() => return Err(McpError::Cancelled),
      result = client.call_tool(&advertised, arguments, Some(deadline)) => result,
    };
    match result {
      Ok(result) if result.is_error() => Err(McpError::Provider(result.text())),
      Ok(result) => Ok(ToolOutput {
        content: result.text(),
        exec: None,
      }),
      Err(ClientError::Disconnected) => Err(McpError::Unavailable(server_id.to_string())),
      Err(ClientError::Timeout(elapsed)) => Err(McpError::Timeout(elapsed)),
      Err(err) => Err(McpError::Provider(err.to_string())),
    }
  }

  /// Configured per-call deadline for a provider's tools.
  pub fn tool_timeout(&self, server_id: &str) -> Option<Duration> {
    lock(&self.inner.configs)
      .get(server_id)
      .and_then(|config| config.tool_timeout_ms)
      .map(Duration::from_millis)
  }

  pub fn is_connected(&self, server_id: &str) -> bool {
    lock(&self.inner.connections)
      .get(server_id)
      .is_some_and(|connection| !connection.client.is_closed())
  }

  /// Every configured or attached provider, in configuration order.
  pub fn servers(&self) -> Vec<ServerStatus> {
    let configs = lock(&self.inner.configs);
    let connections = lock(&self.inner.connections);
    configs
      .iter()
      .map(|(id, config)| {
        let connection = connections.get(id);
        ServerStatus {
          id: id.clone(),
          enabled: config.enabled,
          required: config.required,
          connected: connection.is_some_and(|c| !c.client.is_closed()),
          tools: connection
            .map(|c| c.tools.keys().cloned().collect())
            .unwrap_or_default(),
        }
      })
      .collect()
  }

  pub fn shutdown_all(&self) {
    let connections: Vec<(String, Connection)> = lock(&self.inner.connections).drain().collect();
    for (server_id, connection) in connections {
      connection.close();
      self.inner.registry.unregister_all_from(&server_id);
    }
  }
}

impl Connection {
  fn close(self) {
    self.watcher.abort();
    self.client.shutdown();
  }
}

async fn watch_connection(
  manager: Weak<ManagerInner>,
  server_id: String,
  client: McpClient,
  generation: u64,
) {
  let mut notifications = client.subscribe_notifications();
  loop {
    tokio::select! {
      _ = client.closed() => {
        if let Some(manager) = manager.upgrade() {
          manager.connection_lost(&server_id, generation);
        }
        return;
      }
      notification = notifications.recv() => match notification {
        Ok(Notification::ToolListChanged) => {
          let Some(manager) = manager.upgrade() else {
            return;
          };
          manager.refresh_tools(&server_id, &client, generation).await;
        }
        Err(RecvError::Lagged(skipped)) => {
          debug!(server = %server_id, skipped, "missed provider notifications");
        }
        Err(RecvError::Closed) => {
          client.closed().await;
        }
      },
    }
  }
}

impl ManagerInner {
  fn connection_lost(&self, server_id: &str, generation: u64) {
    let lost = {
      let mut connections = lock(&self.connections);
      if connections
        .get(server_id)
        .is_none_or(|connection| connection.generation != generation)
      {
        return;
      }
      connections.remove(server_id)
    };
    if let Some(connection) = lost {
      // Reap the provider process; the watcher is this task.
      connection.client.shutdown();
    }
    let removed = self.registry.unregister_all_from(server_id);
    warn!(server = server_id, removed, "provider connection lost");
  }

  async fn refresh_tools(&self, server_id: &str, client: &McpClient, generation: u64) {
    let Some(config) = lock(&self.configs).get(server_id).cloned() else {
      return;
    };
    let tools = match client.list_tools(config.startup_timeout()).await {
      Ok(tools) => tools,
      Err(err) => {
        warn!(server = server_id, "failed to refresh tools: {err}");
        return;
      }
    };
    let descriptors = discovery::descriptors_for(server_id, &config, tools);

    let mut connections = lock(&self.connections);
    let Some(connection) = connections
      .get_mut(server_id)
      .filter(|connection| connection.generation == generation)
    else {
      return;
    };
    match self
      .registry
      .register_all(server_id, descriptors, self.duplicate_policy)
    {
      Ok(registered) => {
        info!(server = server_id, tools = registered.len(), "provider tools refreshed");
        connection.tools = registered
          .into_iter()
          .map(|tool| (tool.name, tool.advertised))
          .collect();
      }
      Err(err) => warn!(server = server_id, "keeping previous tools: {err}"),
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

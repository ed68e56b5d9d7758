//! Confirmation gate.
//!
//! Mutating tools need an operator decision before they run. Session-wide
//! answers are appended to an [`ApprovalLog`] and consulted before any
//! prompt; the most recent matching record wins.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tether_config::{ApprovalConfig, ApprovalGranularity};
use tether_protocol::{ApprovalRequestEvent, FailureKind, ReviewDecision, ToolCallRequest};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event::PresentationSink;
use crate::tools::spec::ToolDescriptor;

/// What part of a call a cached decision matches on.
#[derive(Debug, Clone)]
pub enum ArgumentPattern {
  /// Canonical argument JSON, byte for byte.
  Exact(String),
  /// Glob over the canonical argument JSON.
  Glob(glob::Pattern),
}

#[derive(Debug, Clone)]
pub struct ApprovalPattern {
  pub tool: String,
  /// `None` matches every call of `tool`.
  pub arguments: Option<ArgumentPattern>,
}

impl ApprovalPattern {
  pub fn tool(tool: impl Into<String>) -> Self {
    Self {
      tool: tool.into(),
      arguments: None,
    }
  }

  pub fn matches(&self, tool: &str, canonical_arguments: &str) -> bool {
    if self.tool != tool {
      return false;
    }
    match &self.arguments {
      None => true,
      Some(ArgumentPattern::Exact(expected)) => expected == canonical_arguments,
      Some(ArgumentPattern::Glob(pattern)) => pattern.matches(canonical_arguments),
    }
  }
}

#[derive(Debug, Clone)]
pub enum ConfirmationScope {
  OnceOnly,
  SessionAlways(ApprovalPattern),
  SessionDeny(ApprovalPattern),
}

#[derive(Debug, Clone)]
pub struct ConfirmationDecision {
  pub scope: ConfirmationScope,
  pub granted_at: DateTime<Utc>,
}

impl ConfirmationDecision {
  pub fn new(scope: ConfirmationScope) -> Self {
    Self {
      scope,
      granted_at: Utc::now(),
    }
  }

  fn matches(&self, tool: &str, canonical_arguments: &str) -> bool {
    match &self.scope {
      ConfirmationScope::OnceOnly => false,
      ConfirmationScope::SessionAlways(pattern) | ConfirmationScope::SessionDeny(pattern) => {
        pattern.matches(tool, canonical_arguments)
      }
    }
  }
}

/// Append-only record of session-scoped decisions.
#[derive(Debug, Default)]
pub struct ApprovalLog {
  records: RwLock<Vec<Arc<ConfirmationDecision>>>,
}

impl ApprovalLog {
  pub fn new() -> Self {
    Self::default()
  }

  /// Seed `SessionAlways` records from the configured trusted rules.
  pub fn from_config(config: &ApprovalConfig) -> Result<Self, glob::PatternError> {
    let log = Self::new();
    for rule in &config.trusted {
      let arguments = rule
        .arguments
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()?
        .map(ArgumentPattern::Glob);
      log.append(ConfirmationDecision::new(ConfirmationScope::SessionAlways(
        ApprovalPattern {
          tool: rule.tool.clone(),
          arguments,
        },
      )));
    }
    Ok(log)
  }

  /// Once-only decisions are ignored.
  pub fn append(&self, decision: ConfirmationDecision) {
    if matches!(decision.scope, ConfirmationScope::OnceOnly) {
      return;
    }
    self
      .records
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .push(Arc::new(decision));
  }

  /// Most recent record matching the call.
  pub fn lookup(&self, tool: &str, canonical_arguments: &str) -> Option<Arc<ConfirmationDecision>> {
    self
      .records
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .iter()
      .rev()
      .find(|record| record.matches(tool, canonical_arguments))
      .cloned()
  }

  pub fn len(&self) -> usize {
    self
      .records
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
  #[error("{0}")]
  Denied(String),
  #[error("cancelled while awaiting approval")]
  Cancelled,
}

impl GateError {
  pub fn kind(&self) -> FailureKind {
    match self {
      GateError::Denied(_) => FailureKind::UserDenied,
      GateError::Cancelled => FailureKind::Cancelled,
    }
  }
}

pub struct ConfirmationGate {
  log: Arc<ApprovalLog>,
  sink: Arc<dyn PresentationSink>,
  granularity: ApprovalGranularity,
  // One prompt on screen at a time; the log is re-checked after acquiring.
  prompt: Mutex<()>,
}

impl ConfirmationGate {
  pub fn new(
    log: Arc<ApprovalLog>,
    sink: Arc<dyn PresentationSink>,
    granularity: ApprovalGranularity,
  ) -> Self {
    Self {
      log,
      sink,
      granularity,
      prompt: Mutex::new(()),
    }
  }

  pub fn log(&self) -> &Arc<ApprovalLog> {
    &self.log
  }

  pub async fn authorize(
    &self,
    call: &ToolCallRequest,
    descriptor: &ToolDescriptor,
    cancel: &CancellationToken,
  ) -> Result<(), GateError> {
    if !descriptor.is_mutating() {
      return Ok(());
    }

    let canonical = canonical_arguments(&call.arguments);
    if let Some(outcome) = self.cached(&descriptor.name, &canonical) {
      return outcome;
    }

    let _prompt = tokio::select! {
      _ = cancel.cancelled() => return Err(GateError::Cancelled),
      guard = self.prompt.lock() => guard,
    };
    // A sibling call may have recorded a session decision while we waited.
    if let Some(outcome) = self.cached(&descriptor.name, &canonical) {
      return outcome;
    }

    let request = ApprovalRequestEvent {
      call_id: call.id.clone(),
      tool_name: descriptor.name.clone(),
      arguments: call.arguments.clone(),
      rendered: render_arguments(&call.arguments),
    };
    let answer = tokio::select! {
      _ = cancel.cancelled() => {
        self.sink.retract_approval(&call.id).await;
        return Err(GateError::Cancelled);
      }
      answer = self.sink.prompt_approval(request) => answer,
    };
    let decision = match answer {
      Ok(decision) => decision,
      Err(err) => {
        warn!(tool = %descriptor.name, call_id = %call.id, "approval unavailable: {err}");
        return Err(GateError::Denied(format!("approval unavailable: {err}")));
      }
    };

    info!(tool = %descriptor.name, call_id = %call.id, ?decision, "approval decision");
    let pattern = self.pattern_for(&descriptor.name, canonical);
    match decision {
      ReviewDecision::Approved => Ok(()),
      ReviewDecision::ApprovedForSession => {
        self
          .log
          .append(ConfirmationDecision::new(ConfirmationScope::SessionAlways(pattern)));
        Ok(())
      }
      ReviewDecision::Denied => Err(GateError::Denied("operator denied the call".to_string())),
      ReviewDecision::DeniedForSession => {
        self
          .log
          .append(ConfirmationDecision::new(ConfirmationScope::SessionDeny(pattern)));
        Err(GateError::Denied(
          "operator denied the call for this session".to_string(),
        ))
      }
    }
  }

  fn cached(&self, tool: &str, canonical: &str) -> Option<Result<(), GateError>> {
    let record = self.log.lookup(tool, canonical)?;
    match record.scope {
      ConfirmationScope::SessionAlways(_) => {
        debug!(tool, "approved by session decision");
        Some(Ok(()))
      }
      ConfirmationScope::SessionDeny(_) => {
        debug!(tool, "denied by session decision");
        Some(Err(GateError::Denied(
          "operator denied this tool for the session".to_string(),
        )))
      }
      ConfirmationScope::OnceOnly => None,
    }
  }

  fn pattern_for(&self, tool: &str, canonical: String) -> ApprovalPattern {
    match self.granularity {
      ApprovalGranularity::Tool => ApprovalPattern::tool(tool),
      ApprovalGranularity::Arguments => ApprovalPattern {
        tool: tool.to_string(),
        arguments: Some(ArgumentPattern::Exact(canonical)),
      },
    }
  }
}

/// Arguments as compact JSON with object keys sorted.
pub fn canonical_arguments(arguments: &Value) -> String {
  fn sorted(value: &Value) -> Value {
    match value {
      Value::Object(map) => {
        let mut entries: Vec<(&String, &Value)> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        Value::Object(
          entries
            .into_iter()
            .map(|(key, value)| (key.clone(), sorted(value)))
            .collect(),
        )
      }
      Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
      other => other.clone(),
    }
  }
  sorted(arguments).to_string()
}

/// One `key: value` line per argument, strings unquoted.
pub fn render_arguments(arguments: &Value) -> String {
  let Some(fields) = arguments.as_object() else {
    return arguments.to_string();
  };
  fields
    .iter()
    .map(|(key, value)| match value {
      Value::String(text) => format!("{key}: {text}"),
      other => format!("{key}: {other}"),
    })
    .collect::<Vec<_>>()
    .join("\n")
}

// Parallel Execution
// Runs one batch of tool calls and returns exactly one result per call

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tether_protocol::{FailureKind, ToolCallRequest, ToolResult};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::approval::ConfirmationGate;
use crate::event::PresentationSink;
use crate::tools::registry::RegistrySnapshot;
use crate::tools::router::ToolRouter;
use crate::tools::validation::validate_arguments;

pub struct ToolCallRuntime {
  router: Arc<ToolRouter>,
  gate: Arc<ConfirmationGate>,
  sink: Arc<dyn PresentationSink>,
  parallel: bool,
}

impl ToolCallRuntime {
  pub fn new(
    router: Arc<ToolRouter>,
    gate: Arc<ConfirmationGate>,
    sink: Arc<dyn PresentationSink>,
    parallel: bool,
  ) -> Self {
    Self {
      router,
      gate,
      sink,
      parallel,
    }
  }

  /// Results come back in request order, one per request, even when the
  /// batch is cancelled part way.
  pub async fn execute_batch(
    &self,
    snapshot: &RegistrySnapshot,
    calls: &[ToolCallRequest],
    cancel: &CancellationToken,
  ) -> Vec<ToolResult> {
    let mut seen = HashSet::new();
    let duplicate: Vec<bool> = calls.iter().map(|call| !seen.insert(call.id.as_str())).collect();

    let runs = calls.iter().zip(duplicate).map(|(call, duplicate)| {
      let span = info_span!("tool_call", call_id = %call.id, tool = %call.tool_name);
      async move {
        if duplicate {
          let result = ToolResult::failure(
            call,
            FailureKind::InvalidArguments,
            format!("call id `{}` appears more than once in the batch", call.id),
          );
          self.sink.render_tool_result(&result).await;
          return result;
        }
        self.execute_one(snapshot, call, cancel).await
      }
      .instrument(span)
    });

    if self.parallel {
      join_all(runs).await
    } else {
      let mut results = Vec::with_capacity(calls.len());
      for run in runs {
        results.push(run.await);
      }
      results
    }
  }

  async fn execute_one(
    &self,
    snapshot: &RegistrySnapshot,
    call: &ToolCallRequest,
    cancel: &CancellationToken,
  ) -> ToolResult {
    self.sink.render_tool_start(call).await;
    let result = self.run(snapshot, call, &cancel.child_token()).await;
    debug!(success = result.is_success(), kind = ?result.failure_kind(), "tool call finished");
    self.sink.render_tool_result(&result).await;
    result
  }

  async fn run(
    &self,
    snapshot: &RegistrySnapshot,
    call: &ToolCallRequest,
    cancel: &CancellationToken,
  ) -> ToolResult {
    if cancel.is_cancelled() {
      return ToolResult::failure(call, FailureKind::Cancelled, "turn was cancelled");
    }
    let Some(descriptor) = snapshot.lookup(&call.tool_name) else {
      return ToolResult::failure(
        call,
        FailureKind::UnknownTool,
        format!("unknown tool `{}`", call.tool_name),
      );
    };
    if let Err(err) = validate_arguments(&descriptor.parameters, &call.arguments) {
      return ToolResult::failure(call, FailureKind::InvalidArguments, err.to_string());
    }
    if let Err(err) = self.gate.authorize(call, &descriptor, cancel).await {
      return ToolResult::failure(call, err.kind(), err.to_string());
    }
    // The deadline starts once the call is authorized.
    let deadline = self.router.deadline_for(&descriptor);
    self.router.dispatch(&descriptor, call, deadline, cancel).await
  }
}

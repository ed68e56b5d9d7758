mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use tether_config::DuplicateToolPolicy;
use tether_core::mcp::McpError;
use tether_protocol::{FailureKind, MutabilityClass, ReviewDecision};

use common::{
  FakeProvider, RecordingSink, ScriptedModel, Step, call, config_in, content, eventually,
  provider_config, remote_tool, start, tool_results,
};

#[tokio::test]
async fn remote_tools_run_through_the_provider() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![call("call_1", "lookup", json!({ "key": "alpha" }))],
    vec![Step::Text("found it")],
  ]);
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model.clone(), sink.clone()).await;

  let (mut provider, client) = FakeProvider::start(vec![remote_tool("lookup")]).await;
  let mut server = provider_config();
  server.read_only_tools = vec!["lookup".to_string()];
  let registered = tether
    .mcp()
    .attach("fake", client, server)
    .await
    .expect("attach provider");
  assert_eq!(registered, 1);

  let descriptor = tether.registry().lookup("lookup").expect("registered");
  assert_eq!(descriptor.mutability, MutabilityClass::ReadOnly);

  let outcome = tether.run_turn("look up alpha").await;

  assert!(outcome.is_done());
  assert_eq!(provider.next_call().await, "lookup");
  assert!(sink.prompts().is_empty());
  let results = tool_results(tether.session().transcript());
  assert_eq!(content(&results[0]), r#"lookup: {"key":"alpha"}"#);
  assert!(model.requests()[0].tools.iter().any(|tool| tool.name == "lookup"));
}

#[tokio::test]
async fn provider_errors_are_reported_to_the_model() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![call("call_1", "fail", json!({}))],
    vec![Step::Text("that failed")],
  ]);
  let sink = RecordingSink::new();
  sink.answer("fail", ReviewDecision::Approved);
  let mut tether = start(config_in(dir.path()), model, sink.clone()).await;

  let (_provider, client) = FakeProvider::start(vec![remote_tool("fail")]).await;
  tether
    .mcp()
    .attach("fake", client, provider_config())
    .await
    .expect("attach provider");

  tether.run_turn("try it").await;

  // Remote tools are mutating unless marked otherwise.
  assert_eq!(sink.prompts().len(), 1);
  let results = tool_results(tether.session().transcript());
  assert_eq!(results[0].failure_kind(), Some(FailureKind::ProviderError));
  assert!(results[0].model_content().contains("provider exploded"));
}

#[tokio::test]
async fn dropped_provider_fails_in_flight_calls_and_loses_its_tools() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![call("call_1", "hang", json!({}))],
    vec![Step::Text("provider went away")],
  ]);
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model.clone(), sink).await;

  let (mut provider, client) = FakeProvider::start(vec![remote_tool("hang"), remote_tool("lookup")]).await;
  let mut server = provider_config();
  server.read_only_tools = vec!["hang".to_string(), "lookup".to_string()];
  tether
    .mcp()
    .attach("fake", client, server)
    .await
    .expect("attach provider");

  let killer = tokio::spawn(async move {
    assert_eq!(provider.next_call().await, "hang");
    provider.kill();
    provider
  });

  let outcome = tether.run_turn("wait forever").await;
  let _provider = killer.await.expect("killer task");

  assert!(outcome.is_done());
  let results = tool_results(tether.session().transcript());
  assert_eq!(results[0].failure_kind(), Some(FailureKind::ProviderUnavailable));

  let registry = tether.registry().clone();
  assert!(eventually(|| registry.snapshot().lookup("lookup").is_none()).await);
  assert!(registry.snapshot().lookup("list_files").is_some());
  assert!(!tether.mcp().is_connected("fake"));
  assert_eq!(model.requests().len(), 2);
}

#[tokio::test]
async fn disconnect_is_idempotent() {
  let dir = tempfile::tempdir().expect("tempdir");
  let tether = start(
    config_in(dir.path()),
    ScriptedModel::new(Vec::new()),
    RecordingSink::new(),
  )
  .await;

  let (_provider, client) = FakeProvider::start(vec![remote_tool("lookup")]).await;
  tether
    .mcp()
    .attach("fake", client, provider_config())
    .await
    .expect("attach provider");
  let before = tether.registry().snapshot().version();

  assert!(tether.mcp().disconnect("fake"));
  assert!(!tether.mcp().disconnect("fake"));
  assert!(tether.registry().lookup("lookup").is_err());
  assert!(tether.registry().snapshot().version() > before);

  let err = tether
    .mcp()
    .call_tool(
      "fake",
      "lookup",
      json!({}),
      std::time::Duration::from_secs(1),
      &tokio_util::sync::CancellationToken::new(),
    )
    .await
    .expect_err("provider is gone");
  assert!(matches!(err, McpError::Unavailable(_)));
  assert_eq!(err.kind(), FailureKind::ProviderUnavailable);
}

#[tokio::test]
async fn duplicate_names_are_rejected_by_default() {
  let dir = tempfile::tempdir().expect("tempdir");
  let tether = start(
    config_in(dir.path()),
    ScriptedModel::new(Vec::new()),
    RecordingSink::new(),
  )
  .await;

  let (_provider, client) = FakeProvider::start(vec![remote_tool("lookup"), remote_tool("read_file")]).await;
  let err = tether
    .mcp()
    .attach("fake", client, provider_config())
    .await
    .expect_err("read_file is already taken");

  assert!(matches!(err, McpError::Registry { .. }));
  assert!(tether.registry().lookup("lookup").is_err());
  let builtin = tether.registry().lookup("read_file").expect("builtin survives");
  assert_eq!(builtin.mutability, MutabilityClass::ReadOnly);
}

#[tokio::test]
async fn duplicate_names_can_be_qualified() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![call("call_1", "fake__read_file", json!({ "key": "x" }))],
    vec![Step::Text("done")],
  ]);
  let sink = RecordingSink::new();
  let mut config = config_in(dir.path());
  config.mcp.duplicate_tools = DuplicateToolPolicy::Qualify;
  let mut tether = start(config, model, sink).await;

  let (mut provider, client) = FakeProvider::start(vec![remote_tool("read_file")]).await;
  let mut server = provider_config();
  server.read_only_tools = vec!["read_file".to_string()];
  tether
    .mcp()
    .attach("fake", client, server)
    .await
    .expect("attach provider");

  assert!(tether.registry().lookup("fake__read_file").is_ok());
  tether.run_turn("read remotely").await;

  // The provider still sees the name it advertised.
  assert_eq!(provider.next_call().await, "read_file");
  let results = tool_results(tether.session().transcript());
  assert_eq!(content(&results[0]), r#"read_file: {"key":"x"}"#);
}

#[tokio::test]
async fn list_changed_refreshes_the_registry() {
  let dir = tempfile::tempdir().expect("tempdir");
  let tether = start(
    config_in(dir.path()),
    ScriptedModel::new(Vec::new()),
    RecordingSink::new(),
  )
  .await;

  let (provider, client) = FakeProvider::start(vec![remote_tool("lookup")]).await;
  tether
    .mcp()
    .attach("fake", client, provider_config())
    .await
    .expect("attach provider");

  provider.set_tools(vec![remote_tool("search")]);
  provider.announce_list_changed();

  let registry = tether.registry().clone();
  assert!(
    eventually(|| {
      let snapshot = registry.snapshot();
      snapshot.lookup("search").is_some() && snapshot.lookup("lookup").is_none()
    })
    .await
  );
  let status = tether.mcp().servers();
  assert!(status.iter().any(|server| server.id == "fake" && server.tools == vec!["search"]));
}

#[tokio::test]
async fn snapshot_taken_before_a_disconnect_is_unchanged() {
  let dir = tempfile::tempdir().expect("tempdir");
  let tether = start(
    config_in(dir.path()),
    ScriptedModel::new(Vec::new()),
    RecordingSink::new(),
  )
  .await;

  let (_provider, client) = FakeProvider::start(vec![remote_tool("lookup")]).await;
  tether
    .mcp()
    .attach("fake", client, provider_config())
    .await
    .expect("attach provider");

  let pinned = tether.registry().snapshot();
  tether.mcp().disconnect("fake");

  assert!(pinned.lookup("lookup").is_some());
  assert!(tether.registry().snapshot().lookup("lookup").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn provider_closing_right_after_listing_leaves_no_tools() {
  let dir = tempfile::tempdir().expect("tempdir");
  let tether = start(
    config_in(dir.path()),
    ScriptedModel::new(Vec::new()),
    RecordingSink::new(),
  )
  .await;

  let (provider, client) = FakeProvider::start(vec![remote_tool("lookup")]).await;
  provider.close_after_listing();
  let attached = tether.mcp().attach("fake", client, provider_config()).await;

  // The listing may or may not beat the close; either way nothing lingers.
  if let Ok(registered) = attached {
    assert_eq!(registered, 1);
  }
  let registry = tether.registry().clone();
  assert!(eventually(|| registry.snapshot().lookup("lookup").is_none()).await);
  assert!(!tether.mcp().is_connected("fake"));
}

#[tokio::test]
async fn stalled_remote_call_times_out_without_blocking_the_batch() {
  let dir = tempfile::tempdir().expect("tempdir");
  let model = ScriptedModel::new(vec![
    vec![
      call("call_1", "hang", json!({})),
      call("call_2", "lookup", json!({ "key": "beta" })),
    ],
    vec![Step::Text("one of them stalled")],
  ]);
  let sink = RecordingSink::new();
  let mut tether = start(config_in(dir.path()), model.clone(), sink.clone()).await;

  let (mut provider, client) =
    FakeProvider::start(vec![remote_tool("hang"), remote_tool("lookup")]).await;
  let mut server = provider_config();
  server.read_only_tools = vec!["hang".to_string(), "lookup".to_string()];
  server.tool_timeout_ms = Some(300);
  tether
    .mcp()
    .attach("fake", client, server)
    .await
    .expect("attach provider");

  let started = std::time::Instant::now();
  let outcome = tether.run_turn("fetch both").await;

  assert!(outcome.is_done());
  assert!(started.elapsed() < std::time::Duration::from_secs(3));
  let mut seen = vec![provider.next_call().await, provider.next_call().await];
  seen.sort();
  assert_eq!(seen, vec!["hang", "lookup"]);

  let results = tool_results(tether.session().transcript());
  assert_eq!(results.len(), 2);
  assert_eq!(results[0].call_id, "call_1");
  assert_eq!(results[0].failure_kind(), Some(FailureKind::Timeout));
  assert_eq!(content(&results[1]), r#"lookup: {"key":"beta"}"#);
  assert!(sink.prompts().is_empty());
  assert_eq!(model.requests().len(), 2);
  assert!(tether.mcp().is_connected("fake"));
}
